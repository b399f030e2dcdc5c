//! Element-wise reductions over wire bytes.

use parcomm::native::{codes, RawDatatype, RawOp, ReturnCode, UserFunction};
use parcomm::Equivalence;

fn combine<T: Equivalence>(acc: &mut [u8], next: &[u8], f: impl Fn(T, T) -> T) {
    let mut scratch = Vec::with_capacity(T::SIZE);
    for (earlier, later) in acc.chunks_exact_mut(T::SIZE).zip(next.chunks_exact(T::SIZE)) {
        scratch.clear();
        f(T::decode(earlier), T::decode(later)).encode(&mut scratch);
        earlier.copy_from_slice(&scratch);
    }
}

macro_rules! integer_op {
    ($ty:ty, $op:expr, $acc:expr, $next:expr) => {
        match $op {
            RawOp::SUM => combine::<$ty>($acc, $next, <$ty>::wrapping_add),
            RawOp::PROD => combine::<$ty>($acc, $next, <$ty>::wrapping_mul),
            RawOp::MIN => combine::<$ty>($acc, $next, Ord::min),
            RawOp::MAX => combine::<$ty>($acc, $next, Ord::max),
            RawOp::BOR => combine::<$ty>($acc, $next, |a, b| a | b),
            RawOp::BAND => combine::<$ty>($acc, $next, |a, b| a & b),
            RawOp::LOR => combine::<$ty>($acc, $next, |a, b| <$ty>::from(a != 0 || b != 0)),
            RawOp::LAND => combine::<$ty>($acc, $next, |a, b| <$ty>::from(a != 0 && b != 0)),
            _ => return Err(codes::ERR_OP),
        }
    };
}

macro_rules! float_op {
    ($ty:ty, $op:expr, $acc:expr, $next:expr) => {
        match $op {
            RawOp::SUM => combine::<$ty>($acc, $next, |a, b| a + b),
            RawOp::PROD => combine::<$ty>($acc, $next, |a, b| a * b),
            RawOp::MIN => combine::<$ty>($acc, $next, <$ty>::min),
            RawOp::MAX => combine::<$ty>($acc, $next, <$ty>::max),
            _ => return Err(codes::ERR_OP),
        }
    };
}

/// `acc = acc op next` for a predefined operator over `base` elements.
fn apply_predefined(op: RawOp, base: RawDatatype, acc: &mut [u8], next: &[u8]) -> Result<(), ReturnCode> {
    match base {
        RawDatatype::BYTE => integer_op!(u8, op, acc, next),
        RawDatatype::CHAR => integer_op!(i8, op, acc, next),
        RawDatatype::UNSIGNED_SHORT => integer_op!(u16, op, acc, next),
        RawDatatype::UNSIGNED => integer_op!(u32, op, acc, next),
        RawDatatype::UNSIGNED_LONG | RawDatatype::UNSIGNED_LONG_LONG => integer_op!(u64, op, acc, next),
        RawDatatype::SHORT => integer_op!(i16, op, acc, next),
        RawDatatype::INT => integer_op!(i32, op, acc, next),
        RawDatatype::LONG_LONG_INT => integer_op!(i64, op, acc, next),
        RawDatatype::FLOAT => float_op!(f32, op, acc, next),
        RawDatatype::DOUBLE => float_op!(f64, op, acc, next),
        RawDatatype::C_BOOL => match op {
            RawOp::LOR | RawOp::BOR => combine::<bool>(acc, next, |a, b| a || b),
            RawOp::LAND | RawOp::BAND => combine::<bool>(acc, next, |a, b| a && b),
            _ => return Err(codes::ERR_OP),
        },
        _ => return Err(codes::ERR_TYPE),
    }
    Ok(())
}

/// A reduction operator resolved against the handle tables.
#[derive(Clone)]
pub(crate) enum Reducer {
    Predefined(RawOp),
    User(UserFunction),
}

impl Reducer {
    /// Running folds of `contributions` in rank order: entry `r` holds the
    /// reduction of contributions `0..=r`.
    ///
    /// Every contribution holds `len` elements of the predefined `base`.
    pub(crate) fn prefixes(
        &self,
        base: RawDatatype,
        len: usize,
        contributions: &[&[u8]],
    ) -> Result<Vec<Vec<u8>>, ReturnCode> {
        let mut prefixes: Vec<Vec<u8>> = Vec::with_capacity(contributions.len());
        for contribution in contributions {
            let folded = match prefixes.last() {
                None => contribution.to_vec(),
                Some(earlier) => self.fold(base, len, earlier, contribution)?,
            };
            prefixes.push(folded);
        }
        Ok(prefixes)
    }

    /// Reduction of every contribution.
    pub(crate) fn reduce(
        &self,
        base: RawDatatype,
        len: usize,
        contributions: &[&[u8]],
    ) -> Result<Vec<u8>, ReturnCode> {
        self.prefixes(base, len, contributions)?
            .pop()
            .ok_or(codes::ERR_COUNT)
    }

    fn fold(&self, base: RawDatatype, len: usize, earlier: &[u8], later: &[u8]) -> Result<Vec<u8>, ReturnCode> {
        match self {
            Self::Predefined(op) => {
                let mut acc = earlier.to_vec();
                apply_predefined(*op, base, &mut acc, later)?;
                Ok(acc)
            }
            Self::User(function) => {
                let mut next = later.to_vec();
                let len = i32::try_from(len).map_err(|_| codes::ERR_COUNT)?;
                function(earlier, &mut next, len, base);
                Ok(next)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bytes<T: Equivalence>(values: &[T]) -> Vec<u8> {
        let mut out = Vec::new();
        for value in values {
            value.encode(&mut out);
        }
        out
    }

    fn values<T: Equivalence>(bytes: &[u8]) -> Vec<T> {
        bytes.chunks_exact(T::SIZE).map(T::decode).collect()
    }

    #[test]
    fn sums_doubles_in_rank_order() {
        let contributions = [bytes(&[1.0f64, 2.0]), bytes(&[1.0f64, 3.0]), bytes(&[1.0f64, 4.0])];
        let views: Vec<&[u8]> = contributions.iter().map(Vec::as_slice).collect();

        let total = Reducer::Predefined(RawOp::SUM).reduce(RawDatatype::DOUBLE, 2, &views).unwrap();
        assert_eq!(values::<f64>(&total), [3.0, 9.0]);
    }

    #[test]
    fn prefixes_accumulate() {
        let contributions = [bytes(&[5i32]), bytes(&[7i32]), bytes(&[-2i32])];
        let views: Vec<&[u8]> = contributions.iter().map(Vec::as_slice).collect();

        let prefixes = Reducer::Predefined(RawOp::MAX).prefixes(RawDatatype::INT, 1, &views).unwrap();
        let folded: Vec<i32> = prefixes.iter().map(|p| values::<i32>(p)[0]).collect();
        assert_eq!(folded, [5, 7, 7]);
    }

    #[test]
    fn logical_ops_on_integers_yield_zero_or_one() {
        let contributions = [bytes(&[3u32, 0]), bytes(&[0u32, 0])];
        let views: Vec<&[u8]> = contributions.iter().map(Vec::as_slice).collect();

        let any = Reducer::Predefined(RawOp::LOR).reduce(RawDatatype::UNSIGNED, 2, &views).unwrap();
        assert_eq!(values::<u32>(&any), [1, 0]);
    }

    #[test]
    fn bitwise_ops_on_floats_are_rejected() {
        let contributions = [bytes(&[1.0f32]), bytes(&[2.0f32])];
        let views: Vec<&[u8]> = contributions.iter().map(Vec::as_slice).collect();

        let error = Reducer::Predefined(RawOp::BOR).reduce(RawDatatype::FLOAT, 1, &views).unwrap_err();
        assert_eq!(error, codes::ERR_OP);
    }

    #[test]
    fn user_functions_see_earlier_ranks_as_input() {
        let concat: UserFunction = Arc::new(|input: &[u8], inout: &mut [u8], len: i32, _: RawDatatype| {
            for (a, b) in input.chunks_exact(4).zip(inout.chunks_exact_mut(4)).take(len as usize) {
                let value = i32::decode(a) * 10 + i32::decode(b);
                b.copy_from_slice(&value.to_ne_bytes());
            }
        });
        let contributions = [bytes(&[1i32]), bytes(&[2i32]), bytes(&[3i32])];
        let views: Vec<&[u8]> = contributions.iter().map(Vec::as_slice).collect();

        let folded = Reducer::User(concat).reduce(RawDatatype::INT, 1, &views).unwrap();
        assert_eq!(values::<i32>(&folded), [123]);
    }
}
