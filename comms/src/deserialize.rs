use std::io;

/// Decodes a frame body received by an `OnoReceiver`.
///
/// The decoded value may borrow from `buf`, which is 8 byte aligned so any trailing `f64`s can
/// be viewed in place.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
