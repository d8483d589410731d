//! Target variants (spec §6.3): the two Mali cores this backend targets,
//! and the handful of version/quirk constants that differ between them.
//!
//! Ground: `examples/original_source/src/lima/shader/shader_internal.h`'s
//! `lima_core_e` field on the shader object, which the driver consults for
//! the same Mali200/Mali400 core split modeled here.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoreVariant {
    Mali200,
    Mali400,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl CoreVariant {
    /// `CVER`/`CFRA` version code (spec §6.1).
    pub fn version_code(self, stage: Stage) -> u32 {
        match (self, stage) {
            (CoreVariant::Mali200, Stage::Vertex) => 2,
            (CoreVariant::Mali400, Stage::Vertex) => 6,
            (CoreVariant::Mali200, Stage::Fragment) => 5,
            (CoreVariant::Mali400, Stage::Fragment) => 7,
        }
    }

    /// `gl_FragCoord` needs an extra multiply to undo the mali-200
    /// rasterizer's coordinate scaling; mali-400 does not.
    pub fn frag_coord_needs_scale(self) -> bool {
        self == CoreVariant::Mali200
    }

    /// `gl_PointCoord` needs a scale+bias on mali-200 only.
    pub fn point_coord_needs_scale_bias(self) -> bool {
        self == CoreVariant::Mali200
    }
}
