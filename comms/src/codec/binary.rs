use std::num::NonZeroU64;

use bytes::{Buf, BufMut};

use super::{Codec, CodecErr, Result};
use crate::{
    msg::Update,
    state::{ModelState, Tensor},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const STATE_KIND: Header = 0;
const UPDATE_KIND: Header = 1;

/// A compact big-endian binary codec.
///
/// A payload starts with a `u32` kind header, updates follow it with a `u64` sample count. A state
/// is a `u32` amount of parameters and, for every parameter, a `u32` length prefixed utf-8 name,
/// a `u32` rank, one `u64` per dimension and every element as an `f32`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    /// Creates a new `BinaryCodec`.
    pub fn new() -> Self {
        Self
    }

    fn put_len<B: BufMut>(buf: &mut B, len: usize, what: &'static str) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| CodecErr::TooLarge(what))?;
        buf.put_u32(len);
        Ok(())
    }

    fn put_state<B: BufMut>(buf: &mut B, state: &ModelState) -> Result<()> {
        Self::put_len(buf, state.len(), "model state")?;

        for (name, tensor) in state {
            Self::put_len(buf, name.len(), "parameter name")?;
            buf.put_slice(name.as_bytes());

            Self::put_len(buf, tensor.shape().len(), "tensor rank")?;
            for &dim in tensor.shape() {
                buf.put_u64(dim as u64);
            }

            for &x in tensor.iter() {
                buf.put_f32(x);
            }
        }

        Ok(())
    }

    /// Fails unless `buf` still holds at least `needed` bytes.
    fn ensure(buf: &[u8], needed: usize) -> Result<()> {
        if buf.remaining() < needed {
            return Err(CodecErr::Truncated {
                needed,
                remaining: buf.remaining(),
            });
        }

        Ok(())
    }

    fn get_u32(buf: &mut &[u8]) -> Result<u32> {
        Self::ensure(buf, size_of::<u32>())?;
        Ok(buf.get_u32())
    }

    fn get_u64(buf: &mut &[u8]) -> Result<u64> {
        Self::ensure(buf, size_of::<u64>())?;
        Ok(buf.get_u64())
    }

    fn get_kind(buf: &mut &[u8], expected: Header) -> Result<()> {
        Self::ensure(buf, HEADER_SIZE)?;

        match buf.get_u32() {
            kind if kind == expected => Ok(()),
            got => Err(CodecErr::UnexpectedKind { got, expected }),
        }
    }

    fn get_tensor(buf: &mut &[u8]) -> Result<Tensor> {
        let rank = Self::get_u32(buf)? as usize;
        Self::ensure(buf, rank.saturating_mul(size_of::<u64>()))?;

        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            let dim = usize::try_from(buf.get_u64()).map_err(|_| CodecErr::TooLarge("dimension"))?;
            shape.push(dim);
        }

        let elems = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or(CodecErr::TooLarge("tensor"))?;

        let bytes = elems
            .checked_mul(size_of::<f32>())
            .ok_or(CodecErr::TooLarge("tensor"))?;
        Self::ensure(buf, bytes)?;

        let data = (0..elems).map(|_| buf.get_f32()).collect();
        Ok(Tensor::new(shape, data)?)
    }

    fn get_state(buf: &mut &[u8]) -> Result<ModelState> {
        let params = Self::get_u32(buf)?;
        let mut state = ModelState::new();

        for _ in 0..params {
            let name_len = Self::get_u32(buf)? as usize;
            Self::ensure(buf, name_len)?;

            let name = std::str::from_utf8(&buf[..name_len])?.to_string();
            buf.advance(name_len);

            if state.contains(&name) {
                return Err(CodecErr::DuplicateParam(name));
            }

            let tensor = Self::get_tensor(buf)?;
            state.insert(name, tensor);
        }

        Ok(state)
    }

    fn finish(buf: &[u8]) -> Result<()> {
        match buf.remaining() {
            0 => Ok(()),
            n => Err(CodecErr::TrailingBytes(n)),
        }
    }
}

impl Codec for BinaryCodec {
    fn encode_state(&self, state: &ModelState) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.put_u32(STATE_KIND);
        Self::put_state(&mut buf, state)?;
        Ok(buf)
    }

    fn decode_state(&self, mut buf: &[u8]) -> Result<ModelState> {
        Self::get_kind(&mut buf, STATE_KIND)?;
        let state = Self::get_state(&mut buf)?;
        Self::finish(buf)?;
        Ok(state)
    }

    fn encode_update(&self, update: &Update) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.put_u32(UPDATE_KIND);
        buf.put_u64(update.sample_count.get());
        Self::put_state(&mut buf, &update.state)?;
        Ok(buf)
    }

    fn decode_update(&self, mut buf: &[u8]) -> Result<Update> {
        Self::get_kind(&mut buf, UPDATE_KIND)?;
        let sample_count = NonZeroU64::new(Self::get_u64(&mut buf)?).ok_or(CodecErr::ZeroSampleCount)?;
        let state = Self::get_state(&mut buf)?;
        Self::finish(buf)?;
        Ok(Update::new(sample_count, state))
    }
}
