//! URI scheme classification for buffer and image references. `data:` URIs are
//! decoded in place, everything else goes through the injected fetcher.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::LoaderError;

pub enum Scheme<'a> {
    /// Embedded data URI with optional mime type.
    Data(Option<&'a str>, Vec<u8>),
    /// Anything the fetch collaborator should resolve.
    Remote(&'a str),
}

impl<'a> Scheme<'a> {
    pub fn parse(uri: &'a str) -> Result<Scheme<'a>, LoaderError> {
        if uri.len() < 5 || !uri[0..5].eq_ignore_ascii_case("data:") {
            return Ok(Scheme::Remote(uri));
        }

        let content = &uri[5..];
        let Some((param, value)) = content.split_once(',') else {
            return Err(LoaderError::Fetch {
                url: uri.to_owned(),
                detail: "data URI without a comma separator".to_owned(),
            });
        };

        if let Some((mime, encoding)) = param.split_once(';') {
            if !encoding.eq_ignore_ascii_case("base64") {
                return Err(LoaderError::Fetch {
                    url: uri.to_owned(),
                    detail: format!("unsupported data URI encoding '{}'", encoding),
                });
            }
            let data = STANDARD.decode(value).map_err(|e| LoaderError::Fetch {
                url: uri.to_owned(),
                detail: format!("invalid base64 payload: {}", e),
            })?;
            let mime = (!mime.is_empty()).then_some(mime);
            Ok(Scheme::Data(mime, data))
        } else {
            // No encoding parameter: the payload is plain text.
            let mime = (!param.is_empty()).then_some(param);
            Ok(Scheme::Data(mime, value.as_bytes().to_vec()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Scheme;

    #[test]
    fn classifies_remote_uris() {
        assert!(matches!(
            Scheme::parse("meshes/chair.bin").unwrap(),
            Scheme::Remote("meshes/chair.bin")
        ));
    }

    #[test]
    fn decodes_base64_data_uris() {
        let Scheme::Data(mime, data) =
            Scheme::parse("data:application/octet-stream;base64,AAECAw==").unwrap()
        else {
            panic!("expected a data URI");
        };
        assert_eq!(mime, Some("application/octet-stream"));
        assert_eq!(data, vec![0, 1, 2, 3]);
    }

    #[test]
    fn rejects_malformed_data_uris() {
        assert!(Scheme::parse("data:application/octet-stream;base64").is_err());
        assert!(Scheme::parse("data:;base64,not-base64!!!").is_err());
    }
}
