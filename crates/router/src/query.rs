use crate::error::{ErrorKind, Result};
use stash_transcode::TransformParameters;
use url::Url;

/// The recognised query parameters of a request. Unknown parameters are
/// ignored; a repeated parameter takes its last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// `raw`: present and not `0`/`false`.
    pub raw: bool,
    /// `quality` and `maxDimension`.
    pub params: TransformParameters,
}

impl Query {
    pub fn parse(url: &Url) -> Result<Self> {
        let mut raw = false;
        let (mut quality, mut max_dimension) = (None, None);
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "raw" => raw = !matches!(value.as_ref(), "0" | "false"),
                "quality" => quality = Some(number(&name, &value)?),
                "maxDimension" => max_dimension = Some(number(&name, &value)?),
                _ => {},
            }
        }
        let params = TransformParameters::new(quality, max_dimension).map_err(ErrorKind::transcode)?;
        Ok(Self { raw, params })
    }
}

fn number(name: &str, value: &str) -> Result<u32> {
    Ok(value.trim().parse().map_err(|_| ErrorKind::InvalidRequest(format!("{name} must be a non-negative integer")))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(query: &str) -> Result<Query> {
        Query::parse(&Url::parse(&format!("stash://app/image/1?{query}")).unwrap())
    }

    #[rstest]
    #[case("", false)]
    #[case("raw", true)]
    #[case("raw=", true)]
    #[case("raw=1", true)]
    #[case("raw=yes", true)]
    #[case("raw=0", false)]
    #[case("raw=false", false)]
    #[case("raw=1&raw=0", false)]
    fn test_raw_flag(#[case] query: &str, #[case] raw: bool) {
        assert_eq!(parse(query).unwrap().raw, raw);
    }

    #[test]
    fn test_transform_parameters() {
        let query = parse("raw=1&quality=70&maxDimension=640&other=x").unwrap();
        assert_eq!(query.params.quality(), Some(70));
        assert_eq!(query.params.max_dimension(), Some(640));
        assert!(parse("raw=1").unwrap().params.is_empty());
    }

    #[rstest]
    #[case("quality=101")]
    #[case("quality=-1")]
    #[case("quality=high")]
    #[case("maxDimension=0")]
    #[case("maxDimension=1.5")]
    fn test_invalid(#[case] query: &str) {
        let err = parse(query).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRequest(_)));
    }
}
