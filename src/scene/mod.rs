//! The scene graph: an arena of nodes under a single root, the shader
//! library its drawables reference, and the scene's lighting state.

pub mod camera;
pub mod node;

use glam::{Mat4, Vec3};
use slotmap::SlotMap;

use crate::error::{Error, Result};
use crate::light::{AmbientLight, LightAggregator};
use crate::math;
use crate::shader::{Shader, ShaderKey};

use node::{Drawable, Node, NodeKey};

/// Returned by traversal visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    SkipChildren,
}

pub struct Scene {
    nodes: SlotMap<NodeKey, Node>,
    root: NodeKey,
    shaders: SlotMap<ShaderKey, Shader>,
    lights: LightAggregator,
    ambient: Option<AmbientLight>,
    background: Option<Drawable>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node::group("root"));
        Self {
            nodes,
            root,
            shaders: SlotMap::with_key(),
            lights: LightAggregator::new(),
            ambient: None,
            background: None,
        }
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Puts a node in the arena without attaching it anywhere.
    pub fn insert(&mut self, node: Node) -> NodeKey {
        self.nodes.insert(node)
    }

    /// Inserts `node` and attaches it under `parent`.
    pub fn spawn(&mut self, parent: NodeKey, node: Node) -> NodeKey {
        let key = self.nodes.insert(node);
        self.add(parent, key);
        key
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    fn is_ancestor(&self, ancestor: NodeKey, mut key: NodeKey) -> bool {
        loop {
            if key == ancestor {
                return true;
            }
            match self.nodes.get(key).and_then(|n| n.parent) {
                Some(parent) => key = parent,
                None => return false,
            }
        }
    }

    /// Attaches `child` under `parent`, detaching it from any previous
    /// parent first. Returns `false` and leaves the tree untouched when the
    /// edge would create a cycle or either node is unknown.
    pub fn add(&mut self, parent: NodeKey, child: NodeKey) -> bool {
        if !self.contains(parent) || !self.contains(child) {
            log::error!("cannot add {child:?} to {parent:?}: node is not part of the scene");
            return false;
        }
        if self.is_ancestor(child, parent) {
            log::error!("cannot add {child:?} to {parent:?}: a node cannot be its own ancestor");
            return false;
        }

        self.detach(child);
        self.nodes[parent].children.push(child);
        let node = &mut self.nodes[child];
        node.parent = Some(parent);
        node.mark_world_dirty();
        self.register_subtree(child);
        true
    }

    /// Detaches `child` from `parent`. Returns `false` if `parent` is not
    /// its parent.
    pub fn remove(&mut self, parent: NodeKey, child: NodeKey) -> bool {
        if self.nodes.get(child).and_then(|n| n.parent) != Some(parent) {
            return false;
        }
        self.detach(child);
        self.unregister_subtree(child);
        true
    }

    pub fn remove_from_parent(&mut self, child: NodeKey) -> bool {
        match self.nodes.get(child).and_then(|n| n.parent) {
            Some(parent) => self.remove(parent, child),
            None => false,
        }
    }

    fn detach(&mut self, child: NodeKey) {
        let Some(parent) = self.nodes.get_mut(child).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.retain(|k| *k != child);
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.mark_world_dirty();
        }
    }

    fn register_subtree(&mut self, start: NodeKey) {
        let mut lit_drawable = false;
        let mut stack = vec![start];
        while let Some(key) = stack.pop() {
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            self.lights.attach(key, node);
            lit_drawable |= node.drawable().is_some_and(|d| d.kind.is_lit());
            stack.extend(node.children.iter().copied());
        }
        if lit_drawable {
            self.lights.mark_needs_update();
            if let Some(ambient) = &mut self.ambient {
                ambient.mark_needs_update();
            }
        }
    }

    fn unregister_subtree(&mut self, start: NodeKey) {
        let mut stack = vec![start];
        while let Some(key) = stack.pop() {
            self.lights.detach(key);
            if let Some(node) = self.nodes.get(key) {
                stack.extend(node.children.iter().copied());
            }
        }
    }

    /// Disposes `key` and its subtree, children first. Disposing the root
    /// only clears its children. Unknown keys are ignored.
    pub fn dispose(&mut self, key: NodeKey) {
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        let children = node.children.clone();
        for child in children.into_iter().rev() {
            self.dispose(child);
        }
        if key == self.root {
            return;
        }
        self.detach(key);
        self.lights.detach(key);
        self.nodes.remove(key);
    }

    /// Resets per-frame lighting state. Called once before any draw.
    pub fn begin_frame(&mut self) {
        self.lights.begin_frame();
    }

    /// Refreshes world matrices of every node under the root.
    pub fn update_world(&mut self, force: bool) {
        self.update_subtree(self.root, force);
    }

    /// Refreshes `start` and its descendants. A node whose world matrix is
    /// recomputed forces all of its descendants to recompute too.
    pub fn update_subtree(&mut self, start: NodeKey, force: bool) {
        let mut stack = vec![(start, force)];
        while let Some((key, force)) = stack.pop() {
            let parent_world = self
                .nodes
                .get(key)
                .and_then(|n| n.parent)
                .and_then(|p| self.nodes.get(p))
                .map(|p| *p.world_matrix());
            let Some(node) = self.nodes.get_mut(key) else {
                continue;
            };
            node.refresh_local();
            let recomputed = node.refresh_world(parent_world.as_ref(), force);

            if let Some(light) = node.light_mut() {
                let edited = light.take_changed();
                if (edited || recomputed) && self.lights.is_attached(key) {
                    self.lights.mark_values_stale();
                }
            }
            stack.extend(node.children.iter().rev().map(|child| (*child, recomputed)));
        }
    }

    /// Pre-order depth-first walk starting at `start`.
    pub fn traverse(&self, start: NodeKey, mut visitor: impl FnMut(NodeKey, &Node) -> Visit) {
        let mut stack = vec![start];
        while let Some(key) = stack.pop() {
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            if visitor(key, node) == Visit::Continue {
                stack.extend(node.children.iter().rev().copied());
            }
        }
    }

    /// Turns `key` toward `target` using its current world position. Call
    /// after `update_world` so that position is fresh.
    pub fn look_at(&mut self, key: NodeKey, target: Vec3) -> Result<()> {
        let parent_rotation = self
            .nodes
            .get(key)
            .ok_or(Error::UnknownNode)?
            .parent
            .and_then(|p| self.nodes.get(p))
            .map(|p| math::world_rotation(p.world_matrix()));
        let node = self.nodes.get_mut(key).ok_or(Error::UnknownNode)?;
        node.look_at(target, parent_rotation);
        Ok(())
    }

    pub fn world_position(&self, key: NodeKey) -> Option<Vec3> {
        self.nodes.get(key).map(|n| n.world_matrix().w_axis.truncate())
    }

    pub fn world_forward(&self, key: NodeKey) -> Option<Vec3> {
        self.nodes.get(key).map(|n| math::world_forward(n.world_matrix()))
    }

    pub fn inverse_world(&self, key: NodeKey) -> Option<Mat4> {
        self.nodes.get(key).map(|n| n.world_matrix().inverse())
    }

    pub fn add_shader(&mut self, shader: Shader) -> ShaderKey {
        self.shaders.insert(shader)
    }

    pub fn shader(&self, key: ShaderKey) -> Option<&Shader> {
        self.shaders.get(key)
    }

    pub fn shader_mut(&mut self, key: ShaderKey) -> Option<&mut Shader> {
        self.shaders.get_mut(key)
    }

    pub fn shaders_mut(&mut self) -> impl Iterator<Item = &mut Shader> {
        self.shaders.values_mut()
    }

    pub fn lights(&self) -> &LightAggregator {
        &self.lights
    }

    pub fn ambient(&self) -> Option<&AmbientLight> {
        self.ambient.as_ref()
    }

    pub fn ambient_mut(&mut self) -> Option<&mut AmbientLight> {
        self.ambient.as_mut()
    }

    pub fn set_ambient(&mut self, ambient: Option<AmbientLight>) {
        self.ambient = ambient.map(|mut a| {
            a.mark_needs_update();
            a
        });
    }

    pub fn background(&self) -> Option<&Drawable> {
        self.background.as_ref()
    }

    /// Drawable rendered before the scene, with an identity model matrix.
    pub fn set_background(&mut self, background: Option<Drawable>) {
        self.background = background;
    }

    /// Pushes light and ambient state into `shader`.
    pub fn sync_lighting(&mut self, shader: ShaderKey, tail: bool) {
        let Some(shader) = self.shaders.get_mut(shader) else {
            return;
        };
        self.lights.sync(&mut self.nodes, shader, tail);
        if let Some(ambient) = &mut self.ambient {
            ambient.sync(shader, tail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::Light;
    use crate::scene::node::{DirtyState, NodeKind};
    use glam::{Quat, Vec4};

    fn assert_world_invariant(scene: &Scene) {
        scene.traverse(scene.root(), |key, node| {
            let expected = match node.parent() {
                Some(parent) => *scene.node(parent).unwrap().world_matrix() * *node.local_matrix(),
                None => *node.local_matrix(),
            };
            assert!(
                node.world_matrix().abs_diff_eq(expected, 1e-5),
                "world matrix of {key:?} is stale"
            );
            Visit::Continue
        });
    }

    #[test]
    fn test_world_composition_after_mutation() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.spawn(root, Node::group("a").with_position(Vec3::X));
        let b = scene.spawn(a, Node::group("b").with_position(Vec3::Y));
        let c = scene.spawn(b, Node::group("c").with_position(Vec3::Z));
        scene.update_world(false);
        assert_world_invariant(&scene);
        assert_eq!(scene.world_position(c), Some(Vec3::ONE));

        scene.node_mut(a).unwrap().set_rotation(Quat::from_rotation_z(1.0));
        scene.node_mut(b).unwrap().set_scale(Vec3::splat(3.0));
        scene.update_world(false);
        assert_world_invariant(&scene);
    }

    #[test]
    fn test_update_world_is_idempotent() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.spawn(root, Node::group("a").with_position(Vec3::new(1.0, 2.0, 3.0)));
        let b = scene.spawn(a, Node::group("b").with_position(Vec3::X));
        scene.update_world(false);

        let before = *scene.node(b).unwrap().world_matrix();
        scene.update_world(false);
        assert_eq!(*scene.node(b).unwrap().world_matrix(), before);
        assert_eq!(scene.node(b).unwrap().state(), DirtyState::Clean);
    }

    #[test]
    fn test_reparent_updates_world() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.spawn(root, Node::group("a").with_position(Vec3::X));
        let b = scene.spawn(root, Node::group("b").with_position(Vec3::Y));
        let child = scene.spawn(a, Node::group("child"));
        scene.update_world(false);
        assert_eq!(scene.world_position(child), Some(Vec3::X));

        assert!(scene.add(b, child));
        assert!(scene.node(a).unwrap().children().is_empty());
        scene.update_world(false);
        assert_eq!(scene.world_position(child), Some(Vec3::Y));
    }

    #[test]
    fn test_cycles_are_rejected() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.spawn(root, Node::group("a"));
        let b = scene.spawn(a, Node::group("b"));

        assert!(!scene.add(a, a));
        assert!(!scene.add(b, a));
        assert_eq!(scene.node(a).unwrap().parent(), Some(root));
        assert_eq!(scene.node(b).unwrap().children(), &[] as &[NodeKey]);
    }

    #[test]
    fn test_dispose_is_recursive_and_idempotent() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.spawn(root, Node::group("a"));
        let b = scene.spawn(a, Node::group("b"));
        let light = scene.spawn(b, Node::new("sun", NodeKind::Light(Light::directional(Vec4::ONE, 1.0))));
        assert!(scene.lights().is_attached(light));

        scene.dispose(a);
        assert!(!scene.contains(a));
        assert!(!scene.contains(b));
        assert!(!scene.lights().is_attached(light));
        assert!(scene.node(root).unwrap().children().is_empty());
        assert_eq!(scene.len(), 1);

        scene.dispose(a);
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn test_remove_detaches_lights() {
        let mut scene = Scene::new();
        let root = scene.root();
        let light = scene.spawn(root, Node::new("lamp", NodeKind::Light(Light::point(Vec4::ONE, 1.0))));
        assert!(scene.remove_from_parent(light));
        assert!(!scene.lights().is_attached(light));
        assert!(!scene.remove(root, light));
    }

    #[test]
    fn test_traverse_is_preorder() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.spawn(root, Node::group("a"));
        scene.spawn(a, Node::group("a1"));
        let b = scene.spawn(root, Node::group("b"));
        scene.spawn(b, Node::group("b1"));

        let mut names = Vec::new();
        scene.traverse(root, |_, node| {
            names.push(node.name.clone());
            if node.name == "b" {
                Visit::SkipChildren
            } else {
                Visit::Continue
            }
        });
        assert_eq!(names, ["root", "a", "a1", "b"]);
    }

    #[test]
    fn test_look_at_respects_parent_rotation() {
        let mut scene = Scene::new();
        let root = scene.root();
        let parent = scene.spawn(
            root,
            Node::group("rig").with_transform(math::Transform::new(
                Vec3::ZERO,
                Quat::from_rotation_y(1.2),
                Vec3::ONE,
            )),
        );
        let sun = scene.spawn(
            parent,
            Node::new("sun", NodeKind::Light(Light::directional(Vec4::ONE, 1.0))),
        );
        scene.node_mut(sun).unwrap().set_position(Vec3::new(0.0, 0.0, 5.0));
        scene.update_world(false);

        let eye = scene.world_position(sun).unwrap();
        let target = Vec3::new(1.0, -2.0, 0.5);
        scene.look_at(sun, target).unwrap();
        scene.update_world(false);

        let forward = scene.world_forward(sun).unwrap();
        assert!(forward.abs_diff_eq((target - eye).normalize(), 1e-4));
    }

    #[test]
    fn test_light_edits_mark_values_stale() {
        let mut scene = Scene::new();
        let root = scene.root();
        let lamp = scene.spawn(root, Node::new("lamp", NodeKind::Light(Light::point(Vec4::ONE, 1.0))));
        let shader = scene.add_shader(Shader::new("lit", "", ""));
        scene.update_world(false);
        scene.sync_lighting(shader, true);
        assert!(!scene.lights().values_stale());

        scene.update_world(false);
        assert!(!scene.lights().values_stale());

        scene.node_mut(lamp).unwrap().light_mut().unwrap().set_intensity(2.0);
        scene.update_world(false);
        assert!(scene.lights().values_stale());
    }
}
