//! Ambient configuration (§4.13).

use crate::abi::AbiKind;

#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    pub young_bytes: usize,
    pub old_bytes: usize,
    pub card_size: usize,
    pub promotion_threshold: u8,
    pub abi: Option<AbiKind>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            young_bytes: 2 * 1024 * 1024,
            old_bytes: 8 * 1024 * 1024,
            card_size: 512,
            promotion_threshold: 3,
            abi: None,
        }
    }
}

impl VmConfig {
    pub fn abi(&self) -> AbiKind {
        self.abi.unwrap_or_else(AbiKind::host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_sizes() {
        let config = VmConfig::default();
        assert_eq!(config.young_bytes, 2 * 1024 * 1024);
        assert_eq!(config.old_bytes, 8 * 1024 * 1024);
        assert_eq!(config.card_size, 512);
        assert_eq!(config.promotion_threshold, 3);
    }
}
