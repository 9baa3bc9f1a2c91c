#![cfg_attr(feature = "strict", deny(warnings))]

pub mod byte_size;
pub use byte_size::{ByteSize, ByteSizeParseError, SIZE_GIB, SIZE_KIB, SIZE_MIB};

pub mod configuration_utils;
pub use configuration_utils::{env_config_value, ParsableConfigValue};

pub mod serialization_utils;

mod guards;
pub use guards::EnvVarGuard;
