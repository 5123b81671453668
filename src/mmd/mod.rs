//! MikuMikuDance model decoders.

pub mod pmd;
pub mod pmx;
pub mod text;

use log::debug;

use crate::error::{LoadError, Result};

/// A decoded MMD model of either generation.
#[derive(Debug, Clone)]
pub enum MmdModel {
    Pmd(pmd::PmdModel),
    Pmx(pmx::PmxModel),
}

/// Decodes PMX, falling back to PMD when the PMX signature does not match.
///
/// The fallback only happens on a signature mismatch; a PMX file that fails
/// later is reported as is. When neither signature matches the result is a
/// [`LoadError::Format`].
pub fn decode(data: &[u8]) -> Result<MmdModel> {
    match pmx::decode(data) {
        Ok(model) => return Ok(MmdModel::Pmx(model)),
        Err(err) if err.is_format() => debug!("not a PMX file ({err}), trying PMD"),
        Err(err) => return Err(err),
    }
    match pmd::decode(data) {
        Ok(model) => Ok(MmdModel::Pmd(model)),
        Err(err) if err.is_format() => Err(LoadError::Format(
            "neither a PMX nor a PMD signature".to_string(),
        )),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{PmdFixture, PmxFixture};

    #[test]
    fn given_pmd_bytes_when_decoding_with_fallback_then_pmd_model_is_returned() {
        let bytes = PmdFixture::new().bone("センター", None, [0.0; 3]).build();

        assert!(matches!(decode(&bytes), Ok(MmdModel::Pmd(_))));
    }

    #[test]
    fn given_pmx_bytes_when_decoding_with_fallback_then_pmx_model_is_returned() {
        let bytes = PmxFixture::new().build();

        assert!(matches!(decode(&bytes), Ok(MmdModel::Pmx(_))));
    }

    #[test]
    fn given_unknown_bytes_when_decoding_with_fallback_then_format_error() {
        let err = decode(b"OBJ file").unwrap_err();

        assert!(err.is_format());
    }
}
