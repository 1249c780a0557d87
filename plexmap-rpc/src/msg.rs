use bincode::config::{self, Configuration};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::RpcError;

const CONFIGURATION: Configuration = config::standard();

pub fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, RpcError> {
    let result = bincode::serde::encode_to_vec(data, CONFIGURATION)
        .map_err(RpcError::from);
    result
}

/// Encode directly into [`Bytes`] so broadcast payloads clone cheaply.
pub fn encode_bytes<T: Serialize>(data: &T) -> Result<Bytes, RpcError> {
    encode(data).map(Bytes::from)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, RpcError> {
    let result =
        bincode::serde::decode_from_slice::<T, Configuration>(data, CONFIGURATION)
            .map_err(RpcError::from)
            .map(|i| i.0);
    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
    struct Probe {
        key: String,
        value: u64,
    }

    #[test]
    fn round_trip() {
        let probe = Probe {
            key: "k1".into(),
            value: 42,
        };
        let bytes = encode(&probe).unwrap();
        let back: Probe = decode(&bytes).unwrap();
        assert_eq!(probe, back);
    }

    #[test]
    fn decode_garbage_fails() {
        let out = decode::<Probe>(&[0xff, 0xff, 0xff]);
        assert!(matches!(out, Err(RpcError::Decode(_))));
    }
}
