/// `data_version` for envelopes carrying raw UTF-8 bytes in `response_bytes_utf8`
pub const DATA_VERSION_V1: i64 = 1;

/// `data_version` for envelopes carrying text in `response_str`
pub const DATA_VERSION_V2: i64 = 2;

/// Push-subscription delivery endpoint
pub const PUSH_PATH: &str = "/v1/push";
