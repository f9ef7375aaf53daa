//! Compact value encoding for index records and result tables.
//!
//! [`ValueId`] is a 64-bit tagged union that encodes every RDF term the
//! engine touches. The high 4 bits select a type tag; the low 60 bits carry
//! the payload.
//!
//! **Ordering semantics:** The natural `u64` ordering is correct *within* a
//! single tag (integers sort numerically via offset-binary, doubles via an
//! order-preserving bit fold, vocabulary indices by dictionary rank). Across
//! tags, values group by type in tag order, with `UNDEFINED` strictly below
//! everything else. Cross-type *numeric* comparison (Int vs. Double) is a
//! query-layer concern handled by [`crate::ranges::ranges_for_id`], not an
//! index property.
//!
//! `UNDEFINED` is the all-zero id. It is the padding element for optional
//! joins and the identity under comparison-with-anything (always smaller).

use crate::error::{Error, Result};

// ============================================================================
// ValueId
// ============================================================================

/// 64-bit tagged value for index records.
///
/// Layout: `[tag: 4 bits][payload: 60 bits]`
///
/// Tags are chosen so that within-tag `u64` comparison gives the correct
/// domain ordering.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct ValueId(u64);

// Tag constants (high nibble)
const TAG_UNDEFINED: u64 = 0x0;
const TAG_BOOL: u64 = 0x1;
const TAG_INT: u64 = 0x2;
const TAG_DOUBLE: u64 = 0x3;
const TAG_DATE: u64 = 0x4;
const TAG_GEO_POINT: u64 = 0x5;
const TAG_VOCAB: u64 = 0x6;
const TAG_LOCAL_VOCAB: u64 = 0x7;
const TAG_TEXT_RECORD: u64 = 0x8;
const TAG_BLANK_NODE: u64 = 0x9;

const TAG_SHIFT: u32 = 60;
const PAYLOAD_MASK: u64 = (1u64 << TAG_SHIFT) - 1;

/// Offset for i60 offset-binary encoding: 2^59
const I60_OFFSET: u64 = 1u64 << 59;

/// Maximum representable positive i60 value: 2^59 - 1
const I60_MAX: i64 = (1i64 << 59) - 1;

/// Minimum representable negative i60 value: -2^59
const I60_MIN: i64 = -(1i64 << 59);

/// Maximum coordinate resolution of a packed geo point (30 bits per axis).
const GEO_AXIS_MAX: u64 = (1u64 << 30) - 1;

/// Datatype of a [`ValueId`], recovered from its tag nibble.
///
/// The `#[repr(u8)]` values equal the tag constants, so the derived ordering
/// is the cross-tag ordering of the ids themselves.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum Datatype {
    Undefined = 0x0,
    Bool = 0x1,
    Int = 0x2,
    Double = 0x3,
    Date = 0x4,
    GeoPoint = 0x5,
    VocabIndex = 0x6,
    LocalVocabIndex = 0x7,
    TextRecordIndex = 0x8,
    BlankNodeIndex = 0x9,
}

impl Datatype {
    /// Int and Double compare against each other by numeric value.
    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(self, Datatype::Int | Datatype::Double)
    }
}

impl ValueId {
    // ---- Sentinel values ----

    /// The undefined value. Sorts strictly below every other id.
    pub const UNDEFINED: Self = Self(0);

    /// Boolean false.
    pub const BOOL_FALSE: Self = Self(TAG_BOOL << TAG_SHIFT);

    /// Boolean true.
    pub const BOOL_TRUE: Self = Self((TAG_BOOL << TAG_SHIFT) | 1);

    /// Maximum possible ValueId (sorts after everything representable).
    pub const MAX: Self = Self(u64::MAX);

    // ---- Constructors ----

    /// Encode a boolean.
    #[inline]
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::BOOL_TRUE
        } else {
            Self::BOOL_FALSE
        }
    }

    /// Encode a signed integer as offset-binary in the Int tag.
    ///
    /// Returns an error if the value exceeds the i60 range [-2^59, 2^59-1].
    #[inline]
    pub fn int(value: i64) -> Result<Self> {
        if !(I60_MIN..=I60_MAX).contains(&value) {
            return Err(Error::invalid_value(format!(
                "integer {value} exceeds the 60-bit payload range"
            )));
        }
        let payload = (value as u64).wrapping_add(I60_OFFSET) & PAYLOAD_MASK;
        Ok(Self((TAG_INT << TAG_SHIFT) | payload))
    }

    /// Encode a double with an order-preserving 60-bit fold of the IEEE bits.
    ///
    /// The low 4 mantissa bits are truncated; within the Double tag, `u64`
    /// order equals numeric order (NaN excluded).
    #[inline]
    pub fn double(value: f64) -> Self {
        let bits = value.to_bits();
        let folded = if bits >> 63 == 1 { !bits } else { bits | (1u64 << 63) };
        Self((TAG_DOUBLE << TAG_SHIFT) | (folded >> 4))
    }

    /// Encode an xsd:date as days since the Unix epoch (offset-binary).
    #[inline]
    pub fn date(days_since_epoch: i32) -> Self {
        let payload = (days_since_epoch as i64 as u64).wrapping_add(I60_OFFSET) & PAYLOAD_MASK;
        Self((TAG_DATE << TAG_SHIFT) | payload)
    }

    /// Encode a WGS84 point as two 30-bit fixed-point axes (lat, then lng).
    ///
    /// Returns an error for coordinates outside [-90, 90] x [-180, 180].
    pub fn geo_point(lat: f64, lng: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(Error::invalid_value(format!(
                "geo point ({lat}, {lng}) out of WGS84 bounds"
            )));
        }
        let lat_bits = ((lat + 90.0) / 180.0 * GEO_AXIS_MAX as f64).round() as u64;
        let lng_bits = ((lng + 180.0) / 360.0 * GEO_AXIS_MAX as f64).round() as u64;
        Ok(Self(
            (TAG_GEO_POINT << TAG_SHIFT) | (lat_bits << 30) | lng_bits,
        ))
    }

    /// Encode a global vocabulary index.
    #[inline]
    pub fn vocab_index(index: u64) -> Self {
        debug_assert!(index <= PAYLOAD_MASK);
        Self((TAG_VOCAB << TAG_SHIFT) | (index & PAYLOAD_MASK))
    }

    /// Encode a local vocabulary index (strings materialised during a query).
    #[inline]
    pub fn local_vocab_index(index: u64) -> Self {
        debug_assert!(index <= PAYLOAD_MASK);
        Self((TAG_LOCAL_VOCAB << TAG_SHIFT) | (index & PAYLOAD_MASK))
    }

    /// Encode a text-record index.
    #[inline]
    pub fn text_record_index(index: u64) -> Self {
        debug_assert!(index <= PAYLOAD_MASK);
        Self((TAG_TEXT_RECORD << TAG_SHIFT) | (index & PAYLOAD_MASK))
    }

    /// Encode a blank node index.
    #[inline]
    pub fn blank_node_index(index: u64) -> Self {
        debug_assert!(index <= PAYLOAD_MASK);
        Self((TAG_BLANK_NODE << TAG_SHIFT) | (index & PAYLOAD_MASK))
    }

    // ---- Accessors ----

    /// Get the raw u64 representation.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Construct from raw u64.
    #[inline]
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the tag nibble (0..=15).
    #[inline]
    pub fn tag(self) -> u8 {
        (self.0 >> TAG_SHIFT) as u8
    }

    /// Get the 60-bit payload.
    #[inline]
    pub fn payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    /// Recover the datatype from the tag nibble.
    #[inline]
    pub fn datatype(self) -> Datatype {
        match self.0 >> TAG_SHIFT {
            TAG_UNDEFINED => Datatype::Undefined,
            TAG_BOOL => Datatype::Bool,
            TAG_INT => Datatype::Int,
            TAG_DOUBLE => Datatype::Double,
            TAG_DATE => Datatype::Date,
            TAG_GEO_POINT => Datatype::GeoPoint,
            TAG_VOCAB => Datatype::VocabIndex,
            TAG_LOCAL_VOCAB => Datatype::LocalVocabIndex,
            TAG_TEXT_RECORD => Datatype::TextRecordIndex,
            TAG_BLANK_NODE => Datatype::BlankNodeIndex,
            tag => unreachable!("unassigned ValueId tag {tag:#x}"),
        }
    }

    /// Check if this is the undefined value.
    #[inline]
    pub fn is_undefined(self) -> bool {
        self == Self::UNDEFINED
    }

    /// Decode an Int payload back to i64.
    ///
    /// Only valid when `self.datatype() == Datatype::Int` (or `Date`, which
    /// shares the offset-binary encoding).
    #[inline]
    pub fn decode_int(self) -> i64 {
        let raw = self.payload().wrapping_sub(I60_OFFSET);
        // Sign-extend from the 60-bit domain.
        ((raw as i64) << 4) >> 4
    }

    /// Decode a Double payload back to f64 (low 4 mantissa bits are zeroed
    /// for non-negative values).
    #[inline]
    pub fn decode_double(self) -> f64 {
        let folded = self.payload() << 4;
        let bits = if folded >> 63 == 1 {
            folded & !(1u64 << 63)
        } else {
            !folded
        };
        f64::from_bits(bits)
    }

    /// Decode a GeoPoint payload back to (lat, lng).
    #[inline]
    pub fn decode_geo_point(self) -> (f64, f64) {
        let payload = self.payload();
        let lat_bits = (payload >> 30) & GEO_AXIS_MAX;
        let lng_bits = payload & GEO_AXIS_MAX;
        let lat = lat_bits as f64 / GEO_AXIS_MAX as f64 * 180.0 - 90.0;
        let lng = lng_bits as f64 / GEO_AXIS_MAX as f64 * 360.0 - 180.0;
        (lat, lng)
    }

    /// Numeric view of an Int or Double id, `None` for all other tags.
    #[inline]
    pub fn as_numeric(self) -> Option<f64> {
        match self.datatype() {
            Datatype::Int => Some(self.decode_int() as f64),
            Datatype::Double => Some(self.decode_double()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.datatype() {
            Datatype::Undefined => write!(f, "ValueId::UNDEFINED"),
            Datatype::Bool => write!(f, "ValueId::BOOL({})", self.payload() == 1),
            Datatype::Int => write!(f, "ValueId::INT({})", self.decode_int()),
            Datatype::Double => write!(f, "ValueId::DOUBLE({})", self.decode_double()),
            Datatype::Date => write!(f, "ValueId::DATE(days={})", self.decode_int()),
            Datatype::GeoPoint => {
                let (lat, lng) = self.decode_geo_point();
                write!(f, "ValueId::GEO_POINT({lat:.6}, {lng:.6})")
            }
            Datatype::VocabIndex => write!(f, "ValueId::VOCAB({})", self.payload()),
            Datatype::LocalVocabIndex => write!(f, "ValueId::LOCAL_VOCAB({})", self.payload()),
            Datatype::TextRecordIndex => write!(f, "ValueId::TEXT_RECORD({})", self.payload()),
            Datatype::BlankNodeIndex => write!(f, "ValueId::BLANK_NODE({})", self.payload()),
        }
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_round_trip() {
        for &v in &[0i64, 1, -1, 42, -42, 1000, -1000, i32::MAX as i64, i32::MIN as i64] {
            let vid = ValueId::int(v).unwrap();
            assert_eq!(vid.datatype(), Datatype::Int);
            assert_eq!(vid.decode_int(), v, "round-trip failed for {}", v);
        }
    }

    #[test]
    fn test_int_i60_boundaries() {
        let vid_max = ValueId::int(I60_MAX).unwrap();
        assert_eq!(vid_max.decode_int(), I60_MAX);

        let vid_min = ValueId::int(I60_MIN).unwrap();
        assert_eq!(vid_min.decode_int(), I60_MIN);

        assert!(ValueId::int(I60_MAX + 1).is_err());
        assert!(ValueId::int(I60_MIN - 1).is_err());
    }

    #[test]
    fn test_int_ordering() {
        let values = [-1_000_000i64, -2, -1, 0, 1, 2, 1_000_000];
        for w in values.windows(2) {
            assert!(ValueId::int(w[0]).unwrap() < ValueId::int(w[1]).unwrap());
        }
    }

    #[test]
    fn test_double_round_trip_and_ordering() {
        let values = [-1.0e12, -3.5, -0.25, 0.0, 0.25, 3.5, 1.0e12];
        for w in values.windows(2) {
            assert!(ValueId::double(w[0]) < ValueId::double(w[1]));
        }
        for &v in &values {
            let decoded = ValueId::double(v).decode_double();
            // 4 mantissa bits are truncated; relative error is tiny.
            assert!((decoded - v).abs() <= v.abs() * 1e-12 + f64::EPSILON);
        }
    }

    #[test]
    fn test_bool_encoding() {
        assert!(ValueId::BOOL_FALSE < ValueId::BOOL_TRUE);
        assert_eq!(ValueId::from_bool(true), ValueId::BOOL_TRUE);
        assert_eq!(ValueId::BOOL_FALSE.payload(), 0);
    }

    #[test]
    fn test_date_encoding() {
        let vid = ValueId::date(19737);
        assert_eq!(vid.datatype(), Datatype::Date);
        assert_eq!(vid.decode_int(), 19737);

        let vid_neg = ValueId::date(-365);
        assert_eq!(vid_neg.decode_int(), -365);
        assert!(vid_neg < vid);
    }

    #[test]
    fn test_geo_point_round_trip() {
        let vid = ValueId::geo_point(48.0, 7.8).unwrap();
        let (lat, lng) = vid.decode_geo_point();
        assert!((lat - 48.0).abs() < 1e-6);
        assert!((lng - 7.8).abs() < 1e-6);

        assert!(ValueId::geo_point(91.0, 0.0).is_err());
        assert!(ValueId::geo_point(0.0, 200.0).is_err());
    }

    #[test]
    fn test_undefined_below_everything() {
        let others = [
            ValueId::BOOL_FALSE,
            ValueId::int(I60_MIN).unwrap(),
            ValueId::double(f64::NEG_INFINITY),
            ValueId::date(i32::MIN),
            ValueId::vocab_index(0),
            ValueId::local_vocab_index(0),
            ValueId::text_record_index(0),
            ValueId::blank_node_index(0),
        ];
        for other in others {
            assert!(ValueId::UNDEFINED < other, "{other:?} not above UNDEFINED");
        }
        assert!(ValueId::UNDEFINED.is_undefined());
    }

    #[test]
    fn test_cross_tag_ordering() {
        let bool_f = ValueId::BOOL_FALSE;
        let int_0 = ValueId::int(0).unwrap();
        let dbl_0 = ValueId::double(0.0);
        let date = ValueId::date(0);
        let geo = ValueId::geo_point(0.0, 0.0).unwrap();
        let vocab = ValueId::vocab_index(0);
        let local = ValueId::local_vocab_index(0);
        let text = ValueId::text_record_index(0);
        let blank = ValueId::blank_node_index(0);

        let ordered = [bool_f, int_0, dbl_0, date, geo, vocab, local, text, blank];
        for w in ordered.windows(2) {
            assert!(w[0] < w[1], "{:?} !< {:?}", w[0], w[1]);
        }
    }

    #[test]
    fn test_as_numeric() {
        assert_eq!(ValueId::int(7).unwrap().as_numeric(), Some(7.0));
        assert_eq!(ValueId::double(2.5).as_numeric(), Some(2.5));
        assert_eq!(ValueId::vocab_index(7).as_numeric(), None);
    }

    #[test]
    fn test_raw_round_trip() {
        let original = ValueId::vocab_index(123456);
        assert_eq!(ValueId::from_u64(original.as_u64()), original);
    }
}
