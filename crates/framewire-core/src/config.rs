use tracing::{error, info};

use crate::error::ConfigError;

/// A module configuration split into its three bucket groups.
///
/// The flat `k=v,`-string format interleaves parameters for the module itself
/// with blocks for each pin: `in_type=...` opens a new input bucket,
/// `out_type=...` a new output bucket, and every following token belongs to
/// the bucket last opened. Tokens before the first delimiter configure the
/// module. Each bucket keeps its original comma-joined form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedConfig {
    pub module: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

enum Bucket {
    Module,
    Input(usize),
    Output(usize),
}

pub fn parse_module_config(config: &str) -> ParsedConfig {
    let mut parsed = ParsedConfig::default();
    let mut current = Bucket::Module;

    for token in config.split(',') {
        if token.is_empty() {
            info!("empty token in module configuration");
            continue;
        }
        let mut parts = token.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        let Some(value) = parts.next() else {
            error!(token, "parameter is not in format '<param>=<value>'");
            continue;
        };
        if value.contains('=') {
            error!(token, "parameter is not in format '<param>=<value>'");
            continue;
        }

        // Pin delimiters open a new bucket and belong to it.
        if key == "in_type" {
            parsed.inputs.push(String::new());
            current = Bucket::Input(parsed.inputs.len() - 1);
        } else if key == "out_type" {
            parsed.outputs.push(String::new());
            current = Bucket::Output(parsed.outputs.len() - 1);
        }

        let bucket = match current {
            Bucket::Module => &mut parsed.module,
            Bucket::Input(i) => &mut parsed.inputs[i],
            Bucket::Output(i) => &mut parsed.outputs[i],
        };
        if !bucket.is_empty() {
            bucket.push(',');
        }
        bucket.push_str(token);
    }

    parsed
}

/// Ordered `key=value` view over one configuration bucket.
///
/// First occurrence wins for duplicate keys, matching how pins read their
/// block left to right.
#[derive(Debug, Clone, Default)]
pub struct PinParams {
    entries: Vec<(String, String)>,
}

impl PinParams {
    pub fn parse(bucket: &str) -> Self {
        let mut entries = Vec::new();
        for token in bucket.split(',') {
            if token.is_empty() {
                continue;
            }
            let mut parts = token.splitn(2, '=');
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                error!(token, "skipping malformed pin parameter");
                continue;
            };
            entries.push((key.to_string(), value.to_string()));
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn get_u16(&self, key: &str) -> Option<u16> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingParameter(key.to_string()))
    }

    pub fn require_u16(&self, key: &str) -> Result<u16, ConfigError> {
        let value = self.require(key)?;
        value.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_buckets_split_in_declaration_order() {
        let parsed = parse_module_config(
            "type=A,x=1,in_type=udp,p=5,out_type=tcp,q=6,out_type=tcp,r=7",
        );
        assert_eq!(parsed.module, "type=A,x=1");
        assert_eq!(parsed.inputs, vec!["in_type=udp,p=5".to_string()]);
        assert_eq!(
            parsed.outputs,
            vec!["out_type=tcp,q=6".to_string(), "out_type=tcp,r=7".to_string()]
        );
    }

    #[test]
    fn rejoining_buckets_preserves_the_token_multiset() {
        let config = "type=foo,verbose=1,in_type=udp,in_port=5000,out_type=tcp,out_host=10.0.0.1,out_port=6000";
        let parsed = parse_module_config(config);

        let mut rejoined: Vec<&str> = parsed.module.split(',').collect();
        for bucket in parsed.inputs.iter().chain(parsed.outputs.iter()) {
            rejoined.extend(bucket.split(','));
        }
        let mut original: Vec<&str> = config.split(',').collect();
        rejoined.sort_unstable();
        original.sort_unstable();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn malformed_and_empty_tokens_are_skipped() {
        let parsed = parse_module_config("type=A,,oops,x=1=2,y=2");
        assert_eq!(parsed.module, "type=A,y=2");
        assert!(parsed.inputs.is_empty());
        assert!(parsed.outputs.is_empty());
    }

    #[test]
    fn tokens_before_any_delimiter_configure_the_module() {
        let parsed = parse_module_config("a=1,b=2");
        assert_eq!(parsed.module, "a=1,b=2");
    }

    #[test]
    fn empty_value_is_a_valid_token() {
        let parsed = parse_module_config("a=,in_type=loopback");
        assert_eq!(parsed.module, "a=");
        assert_eq!(parsed.inputs, vec!["in_type=loopback".to_string()]);
    }

    #[test]
    fn pin_params_first_occurrence_wins() {
        let params = PinParams::parse("in_type=udp,in_port=5000,in_port=6000");
        assert_eq!(params.get("in_type"), Some("udp"));
        assert_eq!(params.get_u16("in_port"), Some(5000));
        assert_eq!(params.get("missing"), None);
    }
}
