//! Float quantization to fixed-width integers.

/// Multipliers within this distance of 1.0 are treated as 1.0.
pub const MULTIPLIER_EPSILON: f64 = 0.001;

/// Largest magnitude width a quantized field may use.
pub const MAX_QUANTIZED_BITS: u8 = 32;

/// Quantization parameters for a float field.
///
/// The encoded form is `[sign bit if signed][bits-wide magnitude]`, where the
/// magnitude is `round(|value| * multiplier)` saturated to `2^bits - 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuantizeOptions {
    /// Width of the magnitude in bits (sign bit excluded).
    pub bits: u8,
    /// Applied before encoding, divided out after decoding.
    pub multiplier: f64,
    /// Applied after decoding only.
    pub post_multiplier: f64,
    /// Whether a sign bit is written.
    pub signed: bool,
}

impl QuantizeOptions {
    /// Unsigned quantization with unit multipliers.
    #[must_use]
    pub const fn new(bits: u8) -> Self {
        Self {
            bits,
            multiplier: 1.0,
            post_multiplier: 1.0,
            signed: false,
        }
    }

    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub const fn post_multiplier(mut self, post_multiplier: f64) -> Self {
        self.post_multiplier = post_multiplier;
        self
    }

    #[must_use]
    pub const fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    #[must_use]
    pub fn should_multiply(&self) -> bool {
        (self.multiplier - 1.0).abs() > MULTIPLIER_EPSILON
    }

    #[must_use]
    pub fn should_post_multiply(&self) -> bool {
        (self.post_multiplier - 1.0).abs() > MULTIPLIER_EPSILON
    }

    /// Largest encodable magnitude.
    #[must_use]
    pub const fn max_magnitude(&self) -> u64 {
        match 1u64.checked_shl(self.bits as u32) {
            Some(limit) => limit - 1,
            None => u64::MAX,
        }
    }

    /// Checks that the options describe an encodable range.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.bits == 0 || self.bits > MAX_QUANTIZED_BITS {
            return Err("bit count must be between 1 and 32");
        }
        if !self.multiplier.is_finite() || self.multiplier == 0.0 {
            return Err("multiplier must be finite and non-zero");
        }
        if !self.post_multiplier.is_finite() || self.post_multiplier == 0.0 {
            return Err("post multiplier must be finite and non-zero");
        }
        Ok(())
    }

    /// Splits a value into its sign and saturated magnitude.
    ///
    /// NaN quantizes to zero. The sign is dropped when the field is unsigned.
    #[must_use]
    pub fn quantize(&self, value: f64) -> (bool, u64) {
        let negative = self.signed && value < 0.0;
        let mut scaled = value.abs();
        if self.should_multiply() {
            scaled *= self.multiplier;
        }
        let rounded = scaled.round();
        let max = self.max_magnitude();
        let magnitude = if rounded.is_nan() {
            0
        } else if rounded >= max as f64 {
            max
        } else {
            rounded as u64
        };
        (negative, magnitude)
    }

    /// Reverses [`quantize`](Self::quantize).
    #[must_use]
    pub fn dequantize(&self, negative: bool, magnitude: u64) -> f64 {
        let mut value = magnitude as f64;
        if self.should_multiply() {
            value /= self.multiplier;
        }
        if self.should_post_multiply() {
            value *= self.post_multiplier;
        }
        if negative {
            -value
        } else {
            value
        }
    }
}
