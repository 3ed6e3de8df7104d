//! Packs registered lights into fixed-size per-type arrays and keeps each
//! shader's light-count macros in step with the registered set.

use slotmap::SlotMap;

use crate::scene::node::{Node, NodeKey};
use crate::shader::macros::ShaderMacro;
use crate::shader::uniform::{names, UniformValue};
use crate::shader::Shader;

/// Capacity of each per-type light array.
pub const MAX_LIGHTS: usize = 10;

pub const DIRECT_LIGHT_COUNT: &str = "DIRECT_LIGHT_COUNT";
pub const POINT_LIGHT_COUNT: &str = "POINT_LIGHT_COUNT";

/// Packed light data, laid out as the shaders declare it.
#[derive(Debug, Clone, PartialEq)]
pub struct LightBuffers {
    pub direct_color: Vec<f32>,
    pub direct_direction: Vec<f32>,
    pub point_color: Vec<f32>,
    pub point_position: Vec<f32>,
    pub point_distance: Vec<f32>,
}

impl Default for LightBuffers {
    fn default() -> Self {
        Self {
            direct_color: vec![0.0; MAX_LIGHTS * 3],
            direct_direction: vec![0.0; MAX_LIGHTS * 3],
            point_color: vec![0.0; MAX_LIGHTS * 3],
            point_position: vec![0.0; MAX_LIGHTS * 3],
            point_distance: vec![0.0; MAX_LIGHTS],
        }
    }
}

impl LightBuffers {
    fn clear(&mut self) {
        for buffer in [
            &mut self.direct_color,
            &mut self.direct_direction,
            &mut self.point_color,
            &mut self.point_position,
            &mut self.point_distance,
        ] {
            buffer.fill(0.0);
        }
    }
}

#[derive(Debug, Default)]
pub struct LightAggregator {
    directional: Vec<NodeKey>,
    point: Vec<NodeKey>,
    buffers: LightBuffers,
    direct_count: usize,
    point_count: usize,
    needs_update: bool,
    values_stale: bool,
    packed: bool,
    overflowed: bool,
}

impl LightAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a light node. Returns `false` if it was already registered
    /// or the node carries no light.
    pub fn attach(&mut self, key: NodeKey, node: &Node) -> bool {
        let Some(light) = node.light() else {
            return false;
        };
        let list = if light.is_directional() {
            &mut self.directional
        } else {
            &mut self.point
        };
        if list.contains(&key) {
            return false;
        }
        list.push(key);
        self.needs_update = true;
        true
    }

    /// Unregisters a light node. Returns `false` if it was not registered.
    pub fn detach(&mut self, key: NodeKey) -> bool {
        let before = self.directional.len() + self.point.len();
        self.directional.retain(|k| *k != key);
        self.point.retain(|k| *k != key);
        let changed = before != self.directional.len() + self.point.len();
        self.needs_update |= changed;
        changed
    }

    pub fn is_attached(&self, key: NodeKey) -> bool {
        self.directional.contains(&key) || self.point.contains(&key)
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    /// Forces the next sync to re-pack and re-evaluate macros.
    pub fn mark_needs_update(&mut self) {
        self.needs_update = true;
    }

    pub fn values_stale(&self) -> bool {
        self.values_stale
    }

    /// Requests a re-pack without macro re-evaluation.
    pub fn mark_values_stale(&mut self) {
        self.values_stale = true;
    }

    /// Starts a new frame: the next sync packs afresh even if the previous
    /// frame never reached a tail sync.
    pub fn begin_frame(&mut self) {
        self.packed = false;
    }

    pub fn buffers(&self) -> &LightBuffers {
        &self.buffers
    }

    pub fn direct_count(&self) -> usize {
        self.direct_count
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Pushes light state into `shader`. Does nothing unless the registered
    /// set or a light's values changed. Flags are cleared only by the tail
    /// drawable, so every drawable of the frame sees the same data.
    pub fn sync(&mut self, nodes: &mut SlotMap<NodeKey, Node>, shader: &mut Shader, tail: bool) {
        if !self.needs_update && !self.values_stale {
            return;
        }
        if !self.packed {
            self.pack(nodes);
            self.packed = true;
        }

        if self.direct_count > 0 {
            shader.update_uniform(
                names::DIRECT_LIGHT_COLOR,
                UniformValue::FloatArray(self.buffers.direct_color.clone()),
            );
            shader.update_uniform(
                names::DIRECT_LIGHT_DIRECTION,
                UniformValue::FloatArray(self.buffers.direct_direction.clone()),
            );
        }
        if self.point_count > 0 {
            shader.update_uniform(
                names::POINT_LIGHT_COLOR,
                UniformValue::FloatArray(self.buffers.point_color.clone()),
            );
            shader.update_uniform(
                names::POINT_LIGHT_POSITION,
                UniformValue::FloatArray(self.buffers.point_position.clone()),
            );
            shader.update_uniform(
                names::POINT_LIGHT_DISTANCE,
                UniformValue::FloatArray(self.buffers.point_distance.clone()),
            );
        }

        if self.needs_update {
            Self::apply_count_macro(shader, DIRECT_LIGHT_COUNT, self.direct_count);
            Self::apply_count_macro(shader, POINT_LIGHT_COUNT, self.point_count);
        }

        if tail {
            self.needs_update = false;
            self.values_stale = false;
            self.packed = false;
        }
    }

    fn apply_count_macro(shader: &mut Shader, name: &str, count: usize) {
        if count > 0 {
            shader.add_macro(&ShaderMacro::int(name, count as i64));
        } else {
            shader.remove_macro(name);
            shader.mark_all_stale();
        }
    }

    fn pack(&mut self, nodes: &mut SlotMap<NodeKey, Node>) {
        self.buffers.clear();
        self.direct_count = Self::pack_list(&self.directional, nodes, &mut self.buffers);
        self.point_count = Self::pack_list(&self.point, nodes, &mut self.buffers);

        let overflowing = self.directional.len() > MAX_LIGHTS || self.point.len() > MAX_LIGHTS;
        if overflowing && !self.overflowed {
            log::warn!(
                "{} directional and {} point lights registered, only {} of each are rendered",
                self.directional.len(),
                self.point.len(),
                MAX_LIGHTS
            );
        }
        self.overflowed = overflowing;
    }

    fn pack_list(
        keys: &[NodeKey],
        nodes: &mut SlotMap<NodeKey, Node>,
        buffers: &mut LightBuffers,
    ) -> usize {
        let mut count = 0;
        for key in keys {
            let Some(node) = nodes.get_mut(*key) else {
                continue;
            };
            let world = *node.world_matrix();
            let Some(light) = node.light_mut() else {
                continue;
            };
            if count < MAX_LIGHTS {
                light.append(&world, count, buffers);
                light.set_slot(Some(count));
                count += 1;
            } else {
                light.set_slot(None);
            }
        }
        count
    }
}
