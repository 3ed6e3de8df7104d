//! Scene graph nodes.

use glam::{Mat3, Mat4, Quat, Vec3};
use slotmap::new_key_type;

use crate::geometry::Geometry;
use crate::light::Light;
use crate::math::Transform;
use crate::scene::camera::Camera;
use crate::shader::ShaderKey;

new_key_type! {
    /// Key of a node in its scene's arena.
    pub struct NodeKey;
}

/// Where a node stands between a local edit and a fresh world matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    Clean,
    /// Position, rotation or scale changed; the local matrix is stale.
    LocalDirty,
    /// The local matrix is fresh but the world matrix is not.
    WorldDirty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawableKind {
    /// Receives light and ambient state.
    #[default]
    Mesh,
    Sprite,
    Line,
}

impl DrawableKind {
    pub fn is_lit(self) -> bool {
        matches!(self, DrawableKind::Mesh)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drawable {
    pub geometry: Geometry,
    pub shader: ShaderKey,
    pub render_order: i32,
    pub kind: DrawableKind,
}

impl Drawable {
    pub fn mesh(geometry: Geometry, shader: ShaderKey) -> Self {
        Self {
            geometry,
            shader,
            render_order: 0,
            kind: DrawableKind::Mesh,
        }
    }

    pub fn with_kind(mut self, kind: DrawableKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_render_order(mut self, render_order: i32) -> Self {
        self.render_order = render_order;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Group,
    Camera(Camera),
    Light(Light),
    Drawable(Drawable),
}

/// A transform in the scene graph plus an optional payload.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub visible: bool,
    pub kind: NodeKind,
    transform: Transform,
    local: Mat4,
    world: Mat4,
    normal: Mat3,
    state: DirtyState,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) children: Vec<NodeKey>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            visible: true,
            kind,
            transform: Transform::identity(),
            local: Mat4::IDENTITY,
            world: Mat4::IDENTITY,
            normal: Mat3::IDENTITY,
            state: DirtyState::Clean,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Group)
    }

    /// Builder form of [`Node::set_local_transform`].
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.set_local_transform(transform.position, transform.rotation, transform.scale);
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.set_position(position);
        self
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn set_local_transform(&mut self, position: Vec3, rotation: Quat, scale: Vec3) {
        self.transform = Transform::new(position, rotation, scale);
        self.state = DirtyState::LocalDirty;
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.transform.position = position;
        self.state = DirtyState::LocalDirty;
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.transform.rotation = rotation;
        self.state = DirtyState::LocalDirty;
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.transform.scale = scale;
        self.state = DirtyState::LocalDirty;
    }

    pub fn state(&self) -> DirtyState {
        self.state
    }

    pub fn local_matrix(&self) -> &Mat4 {
        &self.local
    }

    pub fn world_matrix(&self) -> &Mat4 {
        &self.world
    }

    pub fn normal_matrix(&self) -> &Mat3 {
        &self.normal
    }

    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    /// The parent changed, so the world matrix must follow.
    pub(crate) fn mark_world_dirty(&mut self) {
        if self.state == DirtyState::Clean {
            self.state = DirtyState::WorldDirty;
        }
    }

    /// Step one of a world update: refresh the local matrix if needed.
    pub(crate) fn refresh_local(&mut self) {
        if self.state == DirtyState::LocalDirty {
            self.local = self.transform.matrix();
            self.state = DirtyState::WorldDirty;
        }
    }

    /// Step two: recompute world and normal matrices when stale or forced.
    /// Returns whether they were recomputed.
    pub(crate) fn refresh_world(&mut self, parent_world: Option<&Mat4>, force: bool) -> bool {
        if self.state != DirtyState::WorldDirty && !force {
            return false;
        }
        self.world = match parent_world {
            Some(parent) => *parent * self.local,
            None => self.local,
        };
        self.normal = crate::math::normal_matrix(&self.world);
        self.state = DirtyState::Clean;
        if let NodeKind::Camera(camera) = &mut self.kind {
            camera.mark_view_dirty();
        }
        true
    }

    /// Orients the node to face `target` from its current world position.
    /// Cameras and lights aim their -Z axis, everything else +Z.
    pub(crate) fn look_at(&mut self, target: Vec3, parent_rotation: Option<Quat>) {
        let eye = self.world.w_axis.truncate();
        let negative_z = matches!(self.kind, NodeKind::Camera(_) | NodeKind::Light(_));
        let Some(rotation) = crate::math::look_rotation(eye, target, Vec3::Y, negative_z) else {
            return;
        };
        let local = match parent_rotation {
            Some(parent) => parent.inverse() * rotation,
            None => rotation,
        };
        self.set_rotation(local.normalize());
    }

    pub fn camera(&self) -> Option<&Camera> {
        match &self.kind {
            NodeKind::Camera(camera) => Some(camera),
            _ => None,
        }
    }

    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        match &mut self.kind {
            NodeKind::Camera(camera) => Some(camera),
            _ => None,
        }
    }

    pub fn light(&self) -> Option<&Light> {
        match &self.kind {
            NodeKind::Light(light) => Some(light),
            _ => None,
        }
    }

    pub fn light_mut(&mut self) -> Option<&mut Light> {
        match &mut self.kind {
            NodeKind::Light(light) => Some(light),
            _ => None,
        }
    }

    pub fn drawable(&self) -> Option<&Drawable> {
        match &self.kind {
            NodeKind::Drawable(drawable) => Some(drawable),
            _ => None,
        }
    }

    pub fn drawable_mut(&mut self) -> Option<&mut Drawable> {
        match &mut self.kind {
            NodeKind::Drawable(drawable) => Some(drawable),
            _ => None,
        }
    }
}
