/// Absolute 0-based frame index in the output movie.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u32);

impl std::fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Saturating conversion into an 8-bit channel value.
pub fn saturate_u8(v: i64) -> u8 {
    v.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturate_u8_clamps_both_ends() {
        assert_eq!(saturate_u8(-1), 0);
        assert_eq!(saturate_u8(0), 0);
        assert_eq!(saturate_u8(128), 128);
        assert_eq!(saturate_u8(255), 255);
        assert_eq!(saturate_u8(1000), 255);
    }
}
