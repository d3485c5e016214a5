/// Number types whose alignment is at least that of `f64`.
///
/// Receive buffers are made of these so a zero-copy `f64` tail can be cast in place.
pub trait Align8: bytemuck::Pod {}

impl Align8 for u64 {}
impl Align8 for i64 {}
impl Align8 for f64 {}
impl Align8 for u128 {}
impl Align8 for i128 {}
