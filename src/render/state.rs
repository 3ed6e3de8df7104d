//! Per-shader render state and the redundant-state filter in front of the
//! graphics context.

use crate::render::context::GraphicsContext;

/// Which faces of a mesh are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    Ccw,
    Cw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullFace {
    Front,
    Back,
    FrontAndBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    SrcAlpha,
    SrcAlphaSaturate,
    DstColor,
    DstAlpha,
    OneMinusSrcColor,
    OneMinusSrcAlpha,
    OneMinusDstColor,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendComponent {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub equation: BlendEquation,
}

impl BlendComponent {
    const fn add(src: BlendFactor, dst: BlendFactor) -> Self {
        Self {
            src,
            dst,
            equation: BlendEquation::Add,
        }
    }
}

/// Fully resolved blend configuration handed to the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

/// Author-supplied blend setup for [`Blending::Custom`]. Alpha settings
/// default to the color ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomBlend {
    pub equation: BlendEquation,
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub equation_alpha: Option<BlendEquation>,
    pub src_alpha: Option<BlendFactor>,
    pub dst_alpha: Option<BlendFactor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Blending {
    None,
    #[default]
    Normal,
    Additive,
    Subtractive,
    Multiply,
    Custom(CustomBlend),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub func: CompareFunc,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolygonOffset {
    pub factor: f32,
    pub units: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveMode {
    #[default]
    Triangles,
    Lines,
    LineStrip,
    Points,
}

/// Fixed-function settings a shader draws with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub side: Side,
    pub transparent: bool,
    pub blending: Blending,
    pub premultiplied_alpha: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: CompareFunc,
    pub polygon_offset: Option<PolygonOffset>,
    pub alpha_to_coverage: bool,
    pub primitive: PrimitiveMode,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            side: Side::Front,
            transparent: false,
            blending: Blending::Normal,
            premultiplied_alpha: false,
            depth_test: true,
            depth_write: true,
            depth_func: CompareFunc::Less,
            polygon_offset: None,
            alpha_to_coverage: false,
            primitive: PrimitiveMode::Triangles,
        }
    }
}

impl RenderState {
    pub fn front_face(&self) -> FrontFace {
        match self.side {
            Side::Back => FrontFace::Cw,
            Side::Front | Side::Double => FrontFace::Ccw,
        }
    }

    pub fn cull_face(&self) -> Option<CullFace> {
        match self.side {
            Side::Double => None,
            Side::Front | Side::Back => Some(CullFace::Back),
        }
    }

    pub fn depth(&self) -> DepthState {
        DepthState {
            test: self.depth_test,
            write: self.depth_write,
            func: self.depth_func,
        }
    }

    /// Blend state, or `None` when blending is disabled. Normal blending
    /// on an opaque shader disables blending.
    pub fn blend(&self) -> Option<BlendState> {
        use BlendFactor::*;

        let symmetric = |component: BlendComponent| BlendState {
            color: component,
            alpha: component,
        };
        let separate = |color: BlendComponent, alpha: BlendComponent| BlendState { color, alpha };

        match (self.blending, self.premultiplied_alpha) {
            (Blending::None, _) => None,
            (Blending::Normal, _) if !self.transparent => None,
            (Blending::Normal, true) => Some(symmetric(BlendComponent::add(One, OneMinusSrcAlpha))),
            (Blending::Normal, false) => Some(separate(
                BlendComponent::add(SrcAlpha, OneMinusSrcAlpha),
                BlendComponent::add(One, OneMinusSrcAlpha),
            )),
            (Blending::Additive, true) => Some(symmetric(BlendComponent::add(One, One))),
            (Blending::Additive, false) => Some(symmetric(BlendComponent::add(SrcAlpha, One))),
            (Blending::Subtractive, true) => Some(separate(
                BlendComponent::add(Zero, Zero),
                BlendComponent::add(OneMinusSrcColor, OneMinusSrcAlpha),
            )),
            (Blending::Subtractive, false) => {
                Some(symmetric(BlendComponent::add(Zero, OneMinusSrcColor)))
            }
            (Blending::Multiply, true) => Some(separate(
                BlendComponent::add(Zero, SrcColor),
                BlendComponent::add(Zero, SrcAlpha),
            )),
            (Blending::Multiply, false) => Some(symmetric(BlendComponent::add(Zero, SrcColor))),
            (Blending::Custom(custom), _) => Some(BlendState {
                color: BlendComponent {
                    src: custom.src,
                    dst: custom.dst,
                    equation: custom.equation,
                },
                alpha: BlendComponent {
                    src: custom.src_alpha.unwrap_or(custom.src),
                    dst: custom.dst_alpha.unwrap_or(custom.dst),
                    equation: custom.equation_alpha.unwrap_or(custom.equation),
                },
            }),
        }
    }
}

/// Remembers what was last sent to the context and only forwards changes.
#[derive(Debug, Default)]
pub struct StateCache {
    front_face: Option<FrontFace>,
    cull_face: Option<Option<CullFace>>,
    blend: Option<Option<BlendState>>,
    depth: Option<DepthState>,
    polygon_offset: Option<Option<PolygonOffset>>,
    alpha_to_coverage: Option<bool>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything, so the next `apply` sends the full state. Used
    /// when something else may have touched the context.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    pub fn apply(&mut self, ctx: &mut dyn GraphicsContext, state: &RenderState) {
        let front_face = state.front_face();
        if self.front_face != Some(front_face) {
            ctx.set_front_face(front_face);
            self.front_face = Some(front_face);
        }

        let cull_face = state.cull_face();
        if self.cull_face != Some(cull_face) {
            ctx.set_cull_face(cull_face);
            self.cull_face = Some(cull_face);
        }

        let blend = state.blend();
        if self.blend != Some(blend) {
            ctx.set_blend(blend);
            self.blend = Some(blend);
        }

        let depth = state.depth();
        if self.depth != Some(depth) {
            ctx.set_depth(depth);
            self.depth = Some(depth);
        }

        if self.polygon_offset != Some(state.polygon_offset) {
            ctx.set_polygon_offset(state.polygon_offset);
            self.polygon_offset = Some(state.polygon_offset);
        }

        if self.alpha_to_coverage != Some(state.alpha_to_coverage) {
            ctx.set_alpha_to_coverage(state.alpha_to_coverage);
            self.alpha_to_coverage = Some(state.alpha_to_coverage);
        }
    }
}
