pub mod common;

pub use common::{
    bps_of, interest_ceil, interest_floor, mul_div_ceil, mul_div_floor, wad, TryAdd, TryDiv,
    TryMul, TrySub, BPS_DIVISOR, MS_PER_YEAR, WAD,
};
