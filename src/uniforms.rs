//! Behavior uniforms: typed values and data textures passed to shaders.
//!
//! A [`UniformSet`] is the declared interface of a behavior. Values become
//! fields of the WGSL `Params` struct (`params.name`), data textures become
//! `tex_name` bindings readable with `textureLoad`.
//!
//! # Example
//!
//! ```ignore
//! let mut uniforms = UniformSet::new();
//! uniforms.declare("strength", 2.0f32)?;
//! uniforms.declare("center", Vec3::ZERO)?;
//! // In the behavior body: params.strength, params.center
//! ```
//!
//! Names used by the simulation driver itself are reserved and rejected at
//! declaration time, so a behavior can never shadow `time` or bind over the
//! state textures.

use glam::{Vec2, Vec3, Vec4};
use std::collections::HashMap;

use crate::error::BehaviorError;

/// Names owned by the simulation driver.
pub const RESERVED_NAMES: &[&str] = &[
    "time",
    "delta",
    "resolution",
    "count",
    "positionTex",
    "velocityTex",
    "position_tex",
    "velocity_tex",
    "seed_position_tex",
    "seed_velocity_tex",
];

const WGSL_KEYWORDS: &[&str] = &[
    "alias", "break", "case", "const", "const_assert", "continue", "continuing", "default",
    "diagnostic", "discard", "else", "enable", "false", "fn", "for", "if", "let", "loop",
    "override", "requires", "return", "struct", "switch", "true", "var", "while",
    // Reserved words that commonly collide with parameter names
    "target", "type", "self", "sampler", "texture", "uniform", "in", "out",
];

/// Supported uniform value types.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    F32(f32),
    I32(i32),
    U32(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
}

impl UniformValue {
    /// Get the WGSL type name for this value.
    pub fn wgsl_type(&self) -> &'static str {
        match self {
            UniformValue::F32(_) => "f32",
            UniformValue::I32(_) => "i32",
            UniformValue::U32(_) => "u32",
            UniformValue::Vec2(_) => "vec2<f32>",
            UniformValue::Vec3(_) => "vec3<f32>",
            UniformValue::Vec4(_) => "vec4<f32>",
        }
    }

    /// Alignment of this type inside a WGSL uniform struct.
    fn alignment(&self) -> usize {
        match self {
            UniformValue::Vec4(_) | UniformValue::Vec3(_) => 16,
            UniformValue::Vec2(_) => 8,
            _ => 4,
        }
    }

    /// Write this value to a byte buffer.
    pub fn write_bytes(&self, buf: &mut Vec<u8>) {
        match self {
            UniformValue::F32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            UniformValue::I32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            UniformValue::U32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            UniformValue::Vec2(v) => buf.extend_from_slice(bytemuck::bytes_of(v)),
            // vec3 occupies 12 bytes; a following scalar may use the trailing 4
            UniformValue::Vec3(v) => buf.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec4(v) => buf.extend_from_slice(bytemuck::bytes_of(v)),
        }
    }

    /// Scalar view, used by host-side kernels.
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            UniformValue::F32(v) => Some(v),
            UniformValue::I32(v) => Some(v as f32),
            UniformValue::U32(v) => Some(v as f32),
            _ => None,
        }
    }

    /// Vector view, used by host-side kernels.
    pub fn as_vec3(&self) -> Option<Vec3> {
        match *self {
            UniformValue::Vec3(v) => Some(v),
            UniformValue::Vec4(v) => Some(v.truncate()),
            UniformValue::Vec2(v) => Some(v.extend(0.0)),
            _ => None,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::F32(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::I32(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::U32(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

/// A small float texture a behavior declares and reads by particle index.
#[derive(Clone, Debug, PartialEq)]
pub struct DataTexture {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Row-major texel data, `width * height` entries.
    pub texels: Vec<Vec4>,
    /// Addressed by particle texel; must match the simulation grid.
    pub per_particle: bool,
}

impl DataTexture {
    /// Create a texture from row-major texels.
    pub fn new(width: u32, height: u32, texels: Vec<Vec4>) -> Self {
        Self {
            width,
            height,
            texels,
            per_particle: false,
        }
    }

    /// Lay out one texel per particle using the same addressing as the
    /// particle state textures (see [`crate::ping_pong::grid_dimensions`]).
    pub fn per_particle(texels: Vec<Vec4>) -> Self {
        let (width, height) = crate::ping_pong::grid_dimensions(texels.len().max(1) as u32);
        let mut texels = texels;
        texels.resize((width * height) as usize, Vec4::ZERO);
        Self {
            width,
            height,
            texels,
            per_particle: true,
        }
    }

    fn check(&self, name: &str) -> Result<(), BehaviorError> {
        let expected = self.width as usize * self.height as usize;
        if expected == 0 || expected != self.texels.len() {
            return Err(BehaviorError::TextureSize {
                name: name.to_string(),
                expected,
                actual: self.texels.len(),
            });
        }
        Ok(())
    }

    /// Reject a per-particle texture laid out for a different grid.
    pub fn check_grid(&self, name: &str, width: u32, height: u32) -> Result<(), BehaviorError> {
        if self.per_particle && (self.width, self.height) != (width, height) {
            return Err(BehaviorError::TextureGrid {
                name: name.to_string(),
                expected: (width, height),
                actual: (self.width, self.height),
            });
        }
        Ok(())
    }
}

/// Check that `name` can be used as a behavior uniform or texture name.
pub fn validate_name(name: &str) -> Result<(), BehaviorError> {
    if RESERVED_NAMES.contains(&name) {
        return Err(BehaviorError::ReservedUniform(name.to_string()));
    }
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest || name == "_" || name.starts_with("__") || WGSL_KEYWORDS.contains(&name) {
        return Err(BehaviorError::InvalidUniformName(name.to_string()));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Value(usize),
    Texture(usize),
}

/// Ordered collection of uniform values and data textures.
#[derive(Clone, Debug, Default)]
pub struct UniformSet {
    /// Ordered list of (name, value) pairs. Order matters for WGSL struct layout.
    values: Vec<(String, UniformValue)>,
    /// Ordered list of (name, texture) pairs. Order matters for binding slots.
    textures: Vec<(String, DataTexture)>,
    /// Quick lookup by name.
    indices: HashMap<String, Slot>,
}

impl UniformSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new value. Rejects reserved, malformed and duplicate names.
    pub fn declare<V: Into<UniformValue>>(&mut self, name: &str, value: V) -> Result<(), BehaviorError> {
        self.claim(name)?;
        self.indices.insert(name.to_string(), Slot::Value(self.values.len()));
        self.values.push((name.to_string(), value.into()));
        Ok(())
    }

    /// Declare a data texture, bound in shaders as `tex_{name}`.
    pub fn declare_texture(&mut self, name: &str, texture: DataTexture) -> Result<(), BehaviorError> {
        self.claim(name)?;
        texture.check(name)?;
        self.indices.insert(name.to_string(), Slot::Texture(self.textures.len()));
        self.textures.push((name.to_string(), texture));
        Ok(())
    }

    /// Declare a value whose name is known to be valid. Presets only.
    pub(crate) fn declare_builtin<V: Into<UniformValue>>(&mut self, name: &'static str, value: V) {
        self.indices.insert(name.to_string(), Slot::Value(self.values.len()));
        self.values.push((name.to_string(), value.into()));
    }

    /// Texture counterpart of [`declare_builtin`](Self::declare_builtin).
    pub(crate) fn declare_texture_builtin(&mut self, name: &'static str, texture: DataTexture) {
        self.indices.insert(name.to_string(), Slot::Texture(self.textures.len()));
        self.textures.push((name.to_string(), texture));
    }

    /// Builder form of [`declare`](Self::declare).
    pub fn with<V: Into<UniformValue>>(mut self, name: &str, value: V) -> Result<Self, BehaviorError> {
        self.declare(name, value)?;
        Ok(self)
    }

    fn claim(&self, name: &str) -> Result<(), BehaviorError> {
        validate_name(name)?;
        if self.indices.contains_key(name) {
            return Err(BehaviorError::DuplicateUniform(name.to_string()));
        }
        Ok(())
    }

    /// Update a declared value.
    ///
    /// Returns `Ok(false)` when `name` is not declared, and an error when the
    /// new value's type differs from the declared one.
    pub fn set<V: Into<UniformValue>>(&mut self, name: &str, value: V) -> Result<bool, BehaviorError> {
        let value = value.into();
        let Some(Slot::Value(idx)) = self.indices.get(name).copied() else {
            return Ok(false);
        };
        let slot = &mut self.values[idx].1;
        if std::mem::discriminant(slot) != std::mem::discriminant(&value) {
            return Err(BehaviorError::UniformTypeMismatch {
                name: name.to_string(),
                expected: slot.wgsl_type(),
                actual: value.wgsl_type(),
            });
        }
        *slot = value;
        Ok(true)
    }

    /// Apply every value in `overrides` that this set declares.
    pub fn apply_overrides(&mut self, overrides: &UniformSet) -> Result<(), BehaviorError> {
        for (name, value) in overrides.values() {
            self.set(name, *value)?;
        }
        Ok(())
    }

    /// Get a uniform value by name.
    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        match self.indices.get(name)? {
            Slot::Value(idx) => Some(&self.values[*idx].1),
            Slot::Texture(_) => None,
        }
    }

    /// Scalar value by name.
    pub fn f32(&self, name: &str) -> Option<f32> {
        self.get(name).and_then(UniformValue::as_f32)
    }

    /// Vector value by name.
    pub fn vec3(&self, name: &str) -> Option<Vec3> {
        self.get(name).and_then(UniformValue::as_vec3)
    }

    /// Get a data texture by name.
    pub fn texture(&self, name: &str) -> Option<&DataTexture> {
        match self.indices.get(name)? {
            Slot::Texture(idx) => Some(&self.textures[*idx].1),
            Slot::Value(_) => None,
        }
    }

    /// Whether `name` is declared (value or texture).
    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Check if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of declared values and textures.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Iterate over values in declaration order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Iterate over data textures in declaration order.
    pub fn textures(&self) -> impl Iterator<Item = (&str, &DataTexture)> {
        self.textures.iter().map(|(n, t)| (n.as_str(), t))
    }

    /// Generate the WGSL `Params` struct body.
    ///
    /// WGSL forbids empty structs, so an empty set yields a padding field.
    pub(crate) fn to_wgsl_fields(&self) -> String {
        if self.values.is_empty() {
            return "    _unused: f32,".to_string();
        }
        self.values
            .iter()
            .map(|(name, value)| format!("    {}: {},", name, value.wgsl_type()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Serialize all values to bytes for GPU upload, padded to 16 bytes.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (_, value) in &self.values {
            let align = value.alignment();
            while buf.len() % align != 0 {
                buf.push(0);
            }
            value.write_bytes(&mut buf);
        }
        // Struct size is rounded up to its largest member alignment (16 for
        // uniform buffers); an empty set still needs one padding field.
        let size = ((buf.len() + 15) & !15).max(16);
        buf.resize(size, 0);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names_rejected() {
        let mut set = UniformSet::new();
        for name in RESERVED_NAMES {
            assert_eq!(
                set.declare(name, 1.0f32),
                Err(BehaviorError::ReservedUniform(name.to_string()))
            );
        }
        assert!(set.is_empty());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut set = UniformSet::new();
        for name in ["", "1abc", "with space", "fn", "__x", "a-b"] {
            assert!(
                matches!(set.declare(name, 1.0f32), Err(BehaviorError::InvalidUniformName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_duplicate_rejected_across_kinds() {
        let mut set = UniformSet::new();
        set.declare("targets", 1.0f32).unwrap();
        let tex = DataTexture::new(1, 1, vec![Vec4::ONE]);
        assert_eq!(
            set.declare_texture("targets", tex),
            Err(BehaviorError::DuplicateUniform("targets".into()))
        );
    }

    #[test]
    fn test_texture_size_checked() {
        let mut set = UniformSet::new();
        let tex = DataTexture::new(2, 2, vec![Vec4::ONE; 3]);
        assert!(matches!(
            set.declare_texture("targets", tex),
            Err(BehaviorError::TextureSize { expected: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn test_per_particle_grid_checked() {
        let tex = DataTexture::per_particle(vec![Vec4::ONE; 5]);
        assert_eq!(tex.check_grid("targets", 3, 2), Ok(()));
        assert_eq!(
            tex.check_grid("targets", 2, 2),
            Err(BehaviorError::TextureGrid {
                name: "targets".into(),
                expected: (2, 2),
                actual: (3, 2),
            })
        );
        // Free-form lookup textures are not tied to the grid
        assert_eq!(DataTexture::new(1, 1, vec![Vec4::ONE]).check_grid("lut", 2, 2), Ok(()));
    }

    #[test]
    fn test_set_checks_type() {
        let mut set = UniformSet::new().with("strength", 1.0f32).unwrap();
        assert_eq!(set.set("strength", 3.0f32), Ok(true));
        assert_eq!(set.f32("strength"), Some(3.0));
        assert_eq!(set.set("missing", 3.0f32), Ok(false));
        assert!(matches!(
            set.set("strength", Vec3::ONE),
            Err(BehaviorError::UniformTypeMismatch { expected: "f32", .. })
        ));
    }

    #[test]
    fn test_layout_matches_wgsl_alignment() {
        let set = UniformSet::new()
            .with("a", 1.0f32)
            .unwrap()
            .with("center", Vec3::new(1.0, 2.0, 3.0))
            .unwrap()
            .with("b", 4.0f32)
            .unwrap();
        let bytes = set.to_bytes();
        // a @0, center @16 (vec3 aligned to 16), b @28 in vec3's tail
        assert_eq!(bytes.len(), 32);
        assert_eq!(f32::from_le_bytes(bytes[16..20].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(bytes[28..32].try_into().unwrap()), 4.0);
    }

    #[test]
    fn test_empty_set_has_padding_field() {
        let set = UniformSet::new();
        assert_eq!(set.to_bytes().len(), 16);
        assert!(set.to_wgsl_fields().contains("_unused"));
    }

    #[test]
    fn test_per_particle_texture_pads() {
        let tex = DataTexture::per_particle(vec![Vec4::ONE; 5]);
        assert_eq!((tex.width, tex.height), (3, 2));
        assert_eq!(tex.texels.len(), 6);
        assert_eq!(tex.texels[5], Vec4::ZERO);
    }
}
