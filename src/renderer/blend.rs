use anyhow::{Result, bail};

fn normalize_blend_token(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace('_', "-")
}

/// How instanced painters combine overlapping instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Blending off; later instances overwrite earlier ones.
    #[default]
    None,
    Add,
    /// Destination minus instance.
    Subtract,
}

impl BlendMode {
    pub const ALL: [BlendMode; 3] = [BlendMode::None, BlendMode::Add, BlendMode::Subtract];

    pub fn parse(s: &str) -> Result<BlendMode> {
        Ok(match normalize_blend_token(s).as_str() {
            "none" | "off" | "replace" | "opaque" => BlendMode::None,
            "add" | "additive" => BlendMode::Add,
            "subtract" | "sub" => BlendMode::Subtract,
            other => bail!("unsupported blend mode: {other}"),
        })
    }

    /// Unknown values warn and fall back to [`BlendMode::None`].
    pub fn parse_or_none(s: &str, context: &str) -> BlendMode {
        BlendMode::parse(s).unwrap_or_else(|e| {
            log::warn!("{context}: {e:#}; blending disabled");
            BlendMode::None
        })
    }

    pub fn blend_state(self) -> Option<wgpu::BlendState> {
        let operation = match self {
            BlendMode::None => return None,
            BlendMode::Add => wgpu::BlendOperation::Add,
            BlendMode::Subtract => wgpu::BlendOperation::ReverseSubtract,
        };
        let component = wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation,
        };
        Some(wgpu::BlendState {
            color: component,
            alpha: component,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_and_separator_insensitive() {
        assert_eq!(BlendMode::parse("Add").unwrap(), BlendMode::Add);
        assert_eq!(BlendMode::parse(" SUBTRACT ").unwrap(), BlendMode::Subtract);
        assert_eq!(BlendMode::parse("None").unwrap(), BlendMode::None);
        assert!(BlendMode::parse("multiply").is_err());
        assert_eq!(BlendMode::parse_or_none("multiply", "test"), BlendMode::None);
    }

    #[test]
    fn subtract_keeps_destination_minus_source() {
        let state = BlendMode::Subtract.blend_state().expect("blending on");
        assert_eq!(state.color.operation, wgpu::BlendOperation::ReverseSubtract);
        assert_eq!(state.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(state.color.dst_factor, wgpu::BlendFactor::One);
        assert!(BlendMode::None.blend_state().is_none());
    }
}
