//! The call-data wire codec.
//!
//! Contract call payloads are text of the form `function@arg1@arg2…`, with
//! every argument hex-encoded. An empty argument encodes as an empty token,
//! so `f@@01` carries two arguments: an empty one and `[0x01]`.

use crate::{CoreError, ReturnCode};

/// Separator between the function name and each argument.
pub const CALL_DATA_SEPARATOR: char = '@';

/// Incrementally builds a call-data payload.
#[derive(Debug, Clone)]
pub struct CallDataBuilder {
    buffer: String,
}

impl CallDataBuilder {
    /// Starts a payload for the given function.
    pub fn new(function: &str) -> Self {
        Self {
            buffer: function.to_string(),
        }
    }

    /// Appends one hex-encoded argument.
    pub fn push_arg(&mut self, arg: &[u8]) -> &mut Self {
        self.buffer.push(CALL_DATA_SEPARATOR);
        self.buffer.push_str(&hex::encode(arg));
        self
    }

    /// Finishes the payload.
    pub fn build(&self) -> Vec<u8> {
        self.buffer.as_bytes().to_vec()
    }
}

/// Parses a call-data payload into its function name and raw arguments.
pub fn parse_call_data(data: &[u8]) -> crate::Result<(String, Vec<Vec<u8>>)> {
    let text = std::str::from_utf8(data)
        .map_err(|_| CoreError::InvalidCallData("payload is not valid UTF-8".to_string()))?;

    let mut tokens = text.split(CALL_DATA_SEPARATOR);
    let function = tokens
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CoreError::InvalidCallData("missing function name".to_string()))?
        .to_string();

    let mut arguments = Vec::new();
    for token in tokens {
        let arg = hex::decode(token)
            .map_err(|_| CoreError::InvalidCallData(format!("invalid hex argument '{token}'")))?;
        arguments.push(arg);
    }

    Ok((function, arguments))
}

/// Builds the payload of a callback transfer: an empty function slot, the
/// return code, then every piece of return data.
pub fn callback_payload(return_code: ReturnCode, return_data: &[Vec<u8>]) -> Vec<u8> {
    let mut builder = CallDataBuilder::new("");
    builder.push_arg(&return_code.to_bytes());
    for data in return_data {
        builder.push_arg(data);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse_roundtrip() {
        let mut builder = CallDataBuilder::new("transfer");
        builder.push_arg(&[0x2a]).push_arg(b"ok");
        let data = builder.build();
        assert_eq!(data, b"transfer@2a@6f6b".to_vec());

        let (function, args) = parse_call_data(&data).unwrap();
        assert_eq!(function, "transfer");
        assert_eq!(args, vec![vec![0x2a], b"ok".to_vec()]);
    }

    #[test]
    fn test_parse_no_arguments() {
        let (function, args) = parse_call_data(b"init").unwrap();
        assert_eq!(function, "init");
        assert!(args.is_empty());
    }

    #[test]
    fn test_parse_empty_argument() {
        let (_, args) = parse_call_data(b"f@@01").unwrap();
        assert_eq!(args, vec![Vec::new(), vec![0x01]]);
    }

    #[test]
    fn test_parse_rejects_missing_function() {
        assert!(parse_call_data(b"").is_err());
        assert!(parse_call_data(b"@2a").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_hex() {
        assert!(parse_call_data(b"f@zz").is_err());
    }

    #[test]
    fn test_callback_payload_shape() {
        let payload = callback_payload(ReturnCode::Ok, &[vec![0x01, 0x02]]);
        assert_eq!(payload, b"@@0102".to_vec());

        let payload = callback_payload(ReturnCode::UserError, &[]);
        assert_eq!(payload, b"@04".to_vec());
    }
}
