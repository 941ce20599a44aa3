//! Runtime render configuration, shared by all frontends and the UI.

/// Which renderer draws the scene this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frontend {
    /// GPU rasterizer with per-pixel linked list transparency.
    Rasterizer,
    /// CPU ray tracer over a segment BVH.
    Raytracer,
    /// GPU volume raymarcher over the voxelized density field.
    Raymarcher,
}

/// Strand shading model used by the rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadingModel {
    KajiyaKay,
    /// Tangent-space debug view.
    Tangents,
}

/// Shadowing policy for the rasterizer. Both techniques sample the same
/// light-space depth map; they differ only in how the samples are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowTechnique {
    Off,
    /// Percentage-closer filtering with a square kernel.
    Pcf,
    /// Approximated deep shadow maps: jittered strided samples converted
    /// into a fractional strand-occlusion estimate.
    ApproximateDeepShadows,
}

/// Flat bag of tunables. Every field has a documented range; the UI clamps
/// to these and the renderers trust them.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub frontend: Frontend,
    pub shading: ShadingModel,

    pub shadow_technique: ShadowTechnique,
    /// PCF kernel half-width in texels, 0..=4.
    pub pcf_kernel: u32,
    /// Deep-shadow sample stride in texels, 1..=8.
    pub deep_shadow_stride: f32,
    /// Strand self-occlusion per blocking sample, 0..=1.
    pub shadow_opacity: f32,

    /// Local ambient occlusion sample radius in world units, 0..=5.
    pub ao_radius: f32,
    /// Occlusion strength multiplier, 0..=1.
    pub ao_strength: f32,

    /// Fraction of segments drawn, 0..=1. Snapped down to whole strands.
    pub reduction_ratio: f32,
    /// Seed for the strand shuffle applied before reduction.
    pub shuffle_seed: u64,

    /// Raymarch step count along each view ray, 16..=512.
    pub raymarch_steps: u32,
    /// Density threshold for isosurface visualization, 0..=1.
    pub isosurface_threshold: f32,
    /// Show the isosurface instead of accumulated transmittance.
    pub isosurface: bool,

    pub background_color: [f32; 3],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frontend: Frontend::Rasterizer,
            shading: ShadingModel::KajiyaKay,
            shadow_technique: ShadowTechnique::ApproximateDeepShadows,
            pcf_kernel: 2,
            deep_shadow_stride: 2.0,
            shadow_opacity: 0.15,
            ao_radius: 1.5,
            ao_strength: 0.8,
            reduction_ratio: 1.0,
            shuffle_seed: 42,
            raymarch_steps: 128,
            isosurface_threshold: 0.12,
            isosurface: false,
            background_color: [0.6, 0.6, 0.6],
        }
    }
}

impl RenderSettings {
    /// Rasterizer settings packed for the strand shader uniform.
    pub fn strand_shader_params(&self) -> [f32; 8] {
        let shadow_mode = match self.shadow_technique {
            ShadowTechnique::Off => 0.0,
            ShadowTechnique::Pcf => 1.0,
            ShadowTechnique::ApproximateDeepShadows => 2.0,
        };
        let shading = match self.shading {
            ShadingModel::KajiyaKay => 0.0,
            ShadingModel::Tangents => 1.0,
        };
        [
            shadow_mode,
            self.pcf_kernel as f32,
            self.deep_shadow_stride,
            self.shadow_opacity,
            self.ao_radius,
            self.ao_strength,
            shading,
            0.0,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_within_documented_ranges() {
        let settings = RenderSettings::default();
        assert!(settings.pcf_kernel <= 4);
        assert!((1.0..=8.0).contains(&settings.deep_shadow_stride));
        assert!((0.0..=1.0).contains(&settings.reduction_ratio));
        assert!((16..=512).contains(&settings.raymarch_steps));
        assert!((0.0..=1.0).contains(&settings.isosurface_threshold));
    }

    #[test]
    fn test_shader_params_encode_the_shadow_technique() {
        let mut settings = RenderSettings::default();
        settings.shadow_technique = ShadowTechnique::Pcf;
        assert_eq!(settings.strand_shader_params()[0], 1.0);
        settings.shadow_technique = ShadowTechnique::Off;
        assert_eq!(settings.strand_shader_params()[0], 0.0);
    }
}
