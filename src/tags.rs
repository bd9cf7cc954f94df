//! Instruction tag constants for the credibility matcher.
//!
//! Tag 0 is fixed by the engine's matcher CPI ABI: the engine always invokes
//! a matcher with a leading zero byte. Tag 1 is unused by this matcher and
//! stays reserved so tags line up with the other Percolator matchers.
//!
//! ⚠️ NEVER reorder, remove, or reuse a tag number.

pub const TAG_MATCH: u8 = 0;
pub const TAG_RESERVED_1: u8 = 1;
pub const TAG_INIT: u8 = 2;
pub const TAG_UPDATE_CREDIBILITY: u8 = 3;
