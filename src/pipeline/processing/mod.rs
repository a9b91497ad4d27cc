// Pipeline processing: schema normalization, platform canonicalization and
// institution identity resolution

pub mod identity;
pub mod normalize;
pub mod platform;
