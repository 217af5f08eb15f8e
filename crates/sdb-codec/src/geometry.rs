//! Plain geometric value types with flat component encodings.
//!
//! These are pure values: they never carry identity, so each occurrence is
//! encoded in full. Components are plain JSON numbers, except that NaN and
//! the infinities are written as the strings `"NaN"`, `"Infinity"` and
//! `"-Infinity"` so they survive a round trip.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector2 {
    #[serde(with = "float")]
    pub x: f32,
    #[serde(with = "float")]
    pub y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    #[serde(with = "float")]
    pub x: f32,
    #[serde(with = "float")]
    pub y: f32,
    #[serde(with = "float")]
    pub z: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector4 {
    #[serde(with = "float")]
    pub x: f32,
    #[serde(with = "float")]
    pub y: f32,
    #[serde(with = "float")]
    pub z: f32,
    #[serde(with = "float")]
    pub w: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vector2Int {
    pub x: i32,
    pub y: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vector3Int {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    #[serde(with = "float")]
    pub x: f32,
    #[serde(with = "float")]
    pub y: f32,
    #[serde(with = "float")]
    pub z: f32,
    #[serde(with = "float")]
    pub w: f32,
}

/// RGBA color with components in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Color {
    #[serde(with = "float")]
    pub r: f32,
    #[serde(with = "float")]
    pub g: f32,
    #[serde(with = "float")]
    pub b: f32,
    #[serde(with = "float")]
    pub a: f32,
}

/// Axis-aligned rectangle given by its minimum corner and size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    #[serde(with = "float")]
    pub x: f32,
    #[serde(with = "float")]
    pub y: f32,
    #[serde(with = "float")]
    pub width: f32,
    #[serde(with = "float")]
    pub height: f32,
}

/// Integer padding on the four sides of a rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RectOffset {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

/// Axis-aligned box given by its center and half-size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub center: Vector3,
    pub extents: Vector3,
}

/// 4x4 matrix; `mRC` is the element at row `R`, column `C`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Matrix4x4 {
    #[serde(with = "float")]
    pub m00: f32,
    #[serde(with = "float")]
    pub m01: f32,
    #[serde(with = "float")]
    pub m02: f32,
    #[serde(with = "float")]
    pub m03: f32,
    #[serde(with = "float")]
    pub m10: f32,
    #[serde(with = "float")]
    pub m11: f32,
    #[serde(with = "float")]
    pub m12: f32,
    #[serde(with = "float")]
    pub m13: f32,
    #[serde(with = "float")]
    pub m20: f32,
    #[serde(with = "float")]
    pub m21: f32,
    #[serde(with = "float")]
    pub m22: f32,
    #[serde(with = "float")]
    pub m23: f32,
    #[serde(with = "float")]
    pub m30: f32,
    #[serde(with = "float")]
    pub m31: f32,
    #[serde(with = "float")]
    pub m32: f32,
    #[serde(with = "float")]
    pub m33: f32,
}

impl Vector2 {
    pub const ZERO: Self = Self::new(0.0, 0.0);

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Vector3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }
}

impl Vector4 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Vector2Int {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Vector3Int {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl Quaternion {
    pub const IDENTITY: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl RectOffset {
    pub const fn new(left: i32, right: i32, top: i32, bottom: i32) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }
}

impl Bounds {
    /// Box centered at `center` with full edge lengths `size`.
    pub fn new(center: Vector3, size: Vector3) -> Self {
        Self {
            center,
            extents: size.scale(0.5),
        }
    }

    pub fn size(&self) -> Vector3 {
        self.extents.scale(2.0)
    }
}

impl Matrix4x4 {
    pub const IDENTITY: Self = Self::from_rows([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    pub const fn from_rows(r: [[f32; 4]; 4]) -> Self {
        Self {
            m00: r[0][0],
            m01: r[0][1],
            m02: r[0][2],
            m03: r[0][3],
            m10: r[1][0],
            m11: r[1][1],
            m12: r[1][2],
            m13: r[1][3],
            m20: r[2][0],
            m21: r[2][1],
            m22: r[2][2],
            m23: r[2][3],
            m30: r[3][0],
            m31: r[3][1],
            m32: r[3][2],
            m33: r[3][3],
        }
    }

    /// Build a matrix from four column vectors.
    pub const fn from_columns(c0: Vector4, c1: Vector4, c2: Vector4, c3: Vector4) -> Self {
        Self::from_rows([
            [c0.x, c1.x, c2.x, c3.x],
            [c0.y, c1.y, c2.y, c3.y],
            [c0.z, c1.z, c2.z, c3.z],
            [c0.w, c1.w, c2.w, c3.w],
        ])
    }

    pub fn column(&self, index: usize) -> Option<Vector4> {
        let c = match index {
            0 => [self.m00, self.m10, self.m20, self.m30],
            1 => [self.m01, self.m11, self.m21, self.m31],
            2 => [self.m02, self.m12, self.m22, self.m32],
            3 => [self.m03, self.m13, self.m23, self.m33],
            _ => return None,
        };
        Some(Vector4::new(c[0], c[1], c[2], c[3]))
    }
}

/// `f32` fields that accept non-finite values.
mod float {
    use std::fmt;

    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;

    const NAN: &str = "NaN";
    const INFINITY: &str = "Infinity";
    const NEG_INFINITY: &str = "-Infinity";

    pub fn serialize<S: Serializer>(v: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            serializer.serialize_f32(*v)
        } else if v.is_nan() {
            serializer.serialize_str(NAN)
        } else if v.is_sign_positive() {
            serializer.serialize_str(INFINITY)
        } else {
            serializer.serialize_str(NEG_INFINITY)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        deserializer.deserialize_any(FloatVisitor)
    }

    struct FloatVisitor;

    impl Visitor<'_> for FloatVisitor {
        type Value = f32;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number, \"NaN\", \"Infinity\" or \"-Infinity\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f32, E> {
            match v {
                NAN => Ok(f32::NAN),
                INFINITY => Ok(f32::INFINITY),
                NEG_INFINITY => Ok(f32::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}
