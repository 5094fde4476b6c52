//! Fixed-size integers and floats.

use super::check_for_extra_bytes;
use crate::npy::{ReadDataError, ReadableElement};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use py_literal::Value as PyValue;
use std::io;

enum Order {
    Little,
    Big,
}

/// Byte order of a descriptor such as `<f8` or `>i4`, if its type code is
/// `code`. Single-byte types also accept the `|` prefix and `aliases`.
fn order_of(type_desc: &PyValue, code: &str, aliases: &[&str]) -> Option<Order> {
    let descr = match type_desc {
        PyValue::String(descr) => descr.as_str(),
        _ => return None,
    };
    let single_byte = code.ends_with('1');
    if single_byte && (descr == code || aliases.contains(&descr)) {
        return Some(Order::Little);
    }
    let (prefix, rest) = match descr.char_indices().nth(1) {
        Some((at, _)) => descr.split_at(at),
        None => return None,
    };
    match prefix {
        _ if rest != code => None,
        "<" => Some(Order::Little),
        ">" => Some(Order::Big),
        "|" if single_byte => Some(Order::Little),
        _ => None,
    }
}

macro_rules! impl_readable_single_byte {
    ($elem:ty, $code:expr, [$($alias:expr),*], |$reader:ident, $out:ident| $read:expr) => {
        impl ReadableElement for $elem {
            fn read_to_end_exact_vec<R: io::Read>(
                mut $reader: R,
                type_desc: &PyValue,
                len: usize,
            ) -> Result<Vec<Self>, ReadDataError> {
                if order_of(type_desc, $code, &[$($alias),*]).is_none() {
                    return Err(ReadDataError::WrongDescriptor(type_desc.clone()));
                }
                let mut $out = vec![0; len];
                $read?;
                check_for_extra_bytes(&mut $reader)?;
                Ok($out)
            }
        }
    };
}

impl_readable_single_byte!(i8, "i1", ["b"], |reader, out| reader.read_i8_into(&mut out));
impl_readable_single_byte!(u8, "u1", ["B"], |reader, out| reader.read_exact(&mut out));

macro_rules! impl_readable_multi_byte {
    ($elem:ty, $code:expr, $read_into:ident) => {
        impl ReadableElement for $elem {
            fn read_to_end_exact_vec<R: io::Read>(
                mut reader: R,
                type_desc: &PyValue,
                len: usize,
            ) -> Result<Vec<Self>, ReadDataError> {
                let mut out = vec![<$elem>::default(); len];
                match order_of(type_desc, $code, &[]) {
                    Some(Order::Little) => reader.$read_into::<LittleEndian>(&mut out)?,
                    Some(Order::Big) => reader.$read_into::<BigEndian>(&mut out)?,
                    None => return Err(ReadDataError::WrongDescriptor(type_desc.clone())),
                }
                check_for_extra_bytes(&mut reader)?;
                Ok(out)
            }
        }
    };
}

impl_readable_multi_byte!(i16, "i2", read_i16_into);
impl_readable_multi_byte!(i32, "i4", read_i32_into);
impl_readable_multi_byte!(i64, "i8", read_i64_into);
impl_readable_multi_byte!(u16, "u2", read_u16_into);
impl_readable_multi_byte!(u32, "u4", read_u32_into);
impl_readable_multi_byte!(u64, "u8", read_u64_into);
impl_readable_multi_byte!(f32, "f4", read_f32_into);
impl_readable_multi_byte!(f64, "f8", read_f64_into);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_f64_both_endians() {
        let value = 1.5f64;
        let little = PyValue::String("<f8".into());
        let big = PyValue::String(">f8".into());
        let out = f64::read_to_end_exact_vec(&value.to_le_bytes()[..], &little, 1).unwrap();
        assert_eq!(out, vec![1.5]);
        let out = f64::read_to_end_exact_vec(&value.to_be_bytes()[..], &big, 1).unwrap();
        assert_eq!(out, vec![1.5]);
    }

    #[test]
    fn reject_extra_bytes() {
        let desc = PyValue::String("<i2".into());
        match i16::read_to_end_exact_vec(&[1u8, 0, 7][..], &desc, 1) {
            Err(ReadDataError::ExtraBytes(1)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn reject_wrong_descriptor() {
        let desc = PyValue::String("<f4".into());
        assert!(matches!(
            i32::read_to_end_exact_vec(&[0u8; 4][..], &desc, 1),
            Err(ReadDataError::WrongDescriptor(_))
        ));
    }

    #[test]
    fn single_byte_prefixes() {
        for descr in ["|i1", "i1", "b", "<i1"] {
            let desc = PyValue::String(descr.into());
            let out = i8::read_to_end_exact_vec(&[0xffu8, 3][..], &desc, 2).unwrap();
            assert_eq!(out, vec![-1, 3], "{}", descr);
        }
        let desc = PyValue::String("|i2".into());
        assert!(i16::read_to_end_exact_vec(&[0u8; 2][..], &desc, 1).is_err());
    }
}
