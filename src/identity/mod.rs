pub mod uid;

pub use uid::{derive, derive_with, validate, Uid, UidScheme, UID_LEN, UID_SUFFIX, UID_SUFFIX_2};
