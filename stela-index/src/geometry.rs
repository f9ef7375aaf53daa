//! Precomputed geometry metadata for WKT literals.
//!
//! A [`GeometryInfo`] holds the bounding box, centroid, metric area and WKT
//! type of one literal, precomputed at index-build time so spatial filters
//! never reparse WKT. Records serialise to a fixed [`GEO_INFO_STRIDE`]-byte
//! layout whose first byte is `wkt_type + 1` and therefore never zero: the
//! all-zero record is reserved as the sentinel for an invalid geometry, and
//! no valid record can collide with it.

use geo::{BoundingRect, Centroid, GeodesicArea};
use geo_types::Geometry;
use std::str::FromStr;

/// Version word at the start of every geometry-info file. Bump when the
/// record layout changes; readers refuse mismatching files.
pub const GEOMETRY_INFO_VERSION: u32 = 1;

/// Serialized size of one [`GeometryInfo`] record:
/// 1 (type) + 4*8 (bbox) + 2*8 (centroid) + 8 (area).
pub const GEO_INFO_STRIDE: usize = 57;

/// The all-zero sentinel marking an invalid / un-parseable geometry.
pub const INVALID_GEO_INFO: [u8; GEO_INFO_STRIDE] = [0u8; GEO_INFO_STRIDE];

/// WKT geometry type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WktType {
    Point = 0,
    LineString = 1,
    Polygon = 2,
    MultiPoint = 3,
    MultiLineString = 4,
    MultiPolygon = 5,
    GeometryCollection = 6,
}

impl WktType {
    /// Classify a parsed geometry.
    pub fn from_geometry(geom: &Geometry<f64>) -> Self {
        match geom {
            Geometry::Point(_) => WktType::Point,
            Geometry::Line(_) | Geometry::LineString(_) => WktType::LineString,
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => WktType::Polygon,
            Geometry::MultiPoint(_) => WktType::MultiPoint,
            Geometry::MultiLineString(_) => WktType::MultiLineString,
            Geometry::MultiPolygon(_) => WktType::MultiPolygon,
            Geometry::GeometryCollection(_) => WktType::GeometryCollection,
        }
    }

    fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => WktType::Point,
            1 => WktType::LineString,
            2 => WktType::Polygon,
            3 => WktType::MultiPoint,
            4 => WktType::MultiLineString,
            5 => WktType::MultiPolygon,
            6 => WktType::GeometryCollection,
            _ => return None,
        })
    }

    /// Check if this type encloses an area.
    pub fn is_areal(&self) -> bool {
        matches!(self, WktType::Polygon | WktType::MultiPolygon)
    }
}

/// Axis-aligned bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Check if this bbox intersects another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lng <= other.max_lng
            && self.max_lng >= other.min_lng
    }

    /// Check if this bbox contains a point.
    pub fn contains_point(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// Precomputed metadata for one WKT literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryInfo {
    pub wkt_type: WktType,
    pub bbox: BoundingBox,
    /// Centroid as (lat, lng).
    pub centroid: (f64, f64),
    /// Geodesic area in square meters. NaN when the area of an areal
    /// geometry could not be computed (counted separately by the writer);
    /// 0.0 for non-areal types.
    pub metric_area: f64,
}

impl GeometryInfo {
    /// Parse a WKT literal and precompute its metadata.
    ///
    /// Accepts both bare WKT (`POINT(7.8 48.0)`) and RDF literal form
    /// (`"POINT(7.8 48.0)"^^<http://www.opengis.net/ont/geosparql#wktLiteral>`).
    /// Returns `None` for anything that does not parse to a non-empty
    /// geometry.
    pub fn from_wkt_literal(literal: &str) -> Option<Self> {
        let wkt_text = strip_wkt_literal(literal);
        let parsed = wkt::Wkt::<f64>::from_str(wkt_text).ok()?;
        let geom: Geometry<f64> = parsed.try_into().ok()?;

        let rect = geom.bounding_rect()?;
        let bbox = BoundingBox {
            min_lat: rect.min().y,
            max_lat: rect.max().y,
            min_lng: rect.min().x,
            max_lng: rect.max().x,
        };
        let centroid = geom.centroid().map(|c| (c.y(), c.x()))?;
        let wkt_type = WktType::from_geometry(&geom);

        let metric_area = if wkt_type.is_areal() {
            let area = match &geom {
                Geometry::Polygon(p) => p.geodesic_area_unsigned(),
                Geometry::MultiPolygon(mp) => mp.geodesic_area_unsigned(),
                Geometry::Rect(r) => r.geodesic_area_unsigned(),
                Geometry::Triangle(t) => t.geodesic_area_unsigned(),
                _ => f64::NAN,
            };
            if area.is_finite() {
                area
            } else {
                f64::NAN
            }
        } else {
            0.0
        };

        Some(Self {
            wkt_type,
            bbox,
            centroid,
            metric_area,
        })
    }

    /// Check if the metric area of this record is usable.
    pub fn area_is_valid(&self) -> bool {
        self.metric_area.is_finite()
    }

    /// Serialize to the fixed-stride record. The first byte is
    /// `wkt_type + 1`, so the result is never all-zero.
    pub fn to_bytes(&self) -> [u8; GEO_INFO_STRIDE] {
        let mut buf = [0u8; GEO_INFO_STRIDE];
        buf[0] = self.wkt_type as u8 + 1;
        let fields = [
            self.bbox.min_lat,
            self.bbox.max_lat,
            self.bbox.min_lng,
            self.bbox.max_lng,
            self.centroid.0,
            self.centroid.1,
            self.metric_area,
        ];
        for (i, value) in fields.iter().enumerate() {
            buf[1 + i * 8..9 + i * 8].copy_from_slice(&value.to_le_bytes());
        }
        buf
    }

    /// Deserialize a fixed-stride record. Returns `None` for the all-zero
    /// sentinel or an unknown type byte.
    pub fn from_bytes(buf: &[u8; GEO_INFO_STRIDE]) -> Option<Self> {
        if buf[0] == 0 {
            return None;
        }
        let wkt_type = WktType::from_u8(buf[0] - 1)?;
        let field = |i: usize| {
            f64::from_le_bytes(buf[1 + i * 8..9 + i * 8].try_into().expect("sized"))
        };
        Some(Self {
            wkt_type,
            bbox: BoundingBox {
                min_lat: field(0),
                max_lat: field(1),
                min_lng: field(2),
                max_lng: field(3),
            },
            centroid: (field(4), field(5)),
            metric_area: field(6),
        })
    }
}

/// Strip the quotes and datatype suffix from an RDF WKT literal.
fn strip_wkt_literal(literal: &str) -> &str {
    let trimmed = literal.trim();
    if let Some(rest) = trimmed.strip_prefix('"') {
        if let Some(end) = rest.rfind('"') {
            return &rest[..end];
        }
    }
    trimmed
}

// ============================================================================
// Tests
// ============================================================================
