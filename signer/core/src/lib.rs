#![allow(clippy::doc_overindented_list_items)]

mod command;
mod constants;
mod error;
mod params;

pub mod wire;

pub use self::command::Command;
pub use self::constants::{
    COORDINATE_LEN, MAX_FRAME_LEN, MAX_PARAM_SIZE, SHA256_DIGEST_LEN, SIGNATURE_LEN,
};
pub use self::error::{ErrorOrigin, SUCCESS, TeeError, TeeResult};
pub use self::params::{
    NUM_PARAMS, OutputBuffer, Param, ParamType, ParamTypes, Params, no_params, param_types_of,
};
