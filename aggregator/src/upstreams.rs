//! URL construction for every upstream source.
//!
//! Base URLs come from configuration; the query shapes are fixed by the
//! services (PDOK Locatieserver, EP-Online, polygonentool WFS, BAG WFS,
//! Kadaster WMS, CBS WFS, geodan WMS).

use crate::config::Upstreams;
use crate::errors::{AggregatorError, Result};
use std::fmt;
use url::Url;

const NETWORK_LAYERS: &str = "se:OGC_Warmtevlak,se:OGC_Elektriciteitnetbeheerdervlak,se:OGC_Gasnetbeheerdervlak,se:OGC_Telecomvlak,se:OGC_Waternetbeheerdervlak,se:OGC_Rioleringsvlakken";

/// Upper bound of features per radius search; results are not paginated.
const RADIUS_SEARCH_COUNT: &str = "200";

/// A point in the coordinate reference system the radius searches run in.
///
/// Parsing never fails: unparsable components become `NaN` and are passed on
/// to the upstream as such.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    /// Parses `"x,y"`. Extra components are ignored.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(',');
        let x = parts.next().map(parse_float_prefix).unwrap_or(f64::NAN);
        let y = parts.next().map(parse_float_prefix).unwrap_or(f64::NAN);
        Self { x, y }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", format_number(self.x), format_number(self.y))
    }
}

/// Parses the longest leading decimal number of `raw`, ignoring leading
/// whitespace and any trailing garbage. Yields `NaN` when there is none.
fn parse_float_prefix(raw: &str) -> f64 {
    let s = raw.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    if s[end..].starts_with("Infinity") {
        return match bytes.first() {
            Some(b'-') => f64::NEG_INFINITY,
            _ => f64::INFINITY,
        };
    }

    let digits = |from: usize| {
        bytes[from..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let integer = digits(end);
    end += integer;
    let mut fraction = 0;
    if bytes.get(end) == Some(&b'.') {
        fraction = digits(end + 1);
        end += 1 + fraction;
    }
    if integer == 0 && fraction == 0 {
        return f64::NAN;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = digits(exp_end);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    s[..end].parse().unwrap_or(f64::NAN)
}

fn format_number(value: f64) -> String {
    if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        value.to_string()
    }
}

fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn with_query<'a>(base: &Url, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut().extend_pairs(pairs);
    url
}

fn with_segment(base: &Url, segment: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| AggregatorError::InternalError(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}

/// Builds the request URL of each source.
#[derive(Clone, Debug)]
pub struct UpstreamUrls {
    upstreams: Upstreams,
    search_radius_m: u32,
}

impl UpstreamUrls {
    pub fn new(upstreams: Upstreams, search_radius_m: u32) -> Self {
        Self {
            upstreams,
            search_radius_m,
        }
    }

    /// Locatieserver lookup of a location id
    pub fn lookup(&self, location_id: &str) -> Url {
        with_query(&self.upstreams.locatieserver, [("id", location_id)])
    }

    /// EP-Online energy label of an addressable object
    pub fn energy_label(&self, object_id: &str) -> Result<Url> {
        with_segment(&self.upstreams.ep_online, object_id)
    }

    /// Energy label of an addressable object, through the forwarding service
    pub fn forwarded_energy_label(&self, object_id: &str) -> Result<Url> {
        Ok(self.forwarded(&self.energy_label(object_id)?))
    }

    /// Utility network service areas intersecting `bbox`
    pub fn network_polygons(&self, bbox: &str) -> Url {
        with_query(
            &self.upstreams.polygonentool,
            [
                ("service", "wfs"),
                ("version", "2.0.0"),
                ("request", "getfeature"),
                ("typename", NETWORK_LAYERS),
                ("propertyname", "name,disciplineCode"),
                ("outputformat", "application/json"),
                ("SRSNAME", "urn:ogc:def:crs:EPSG::28992"),
                ("bbox", bbox),
            ],
        )
    }

    /// BAG dwelling objects whose `identificatie` equals `object_id`
    pub fn object_by_id(&self, object_id: &str) -> Url {
        let filter = format!(
            concat!(
                r#"<fes:Filter xmlns:fes="http://www.opengis.net/fes/2.0" "#,
                r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
                r#"xsi:schemaLocation="http://www.opengis.net/wfs/2.0 http://schemas.opengis.net/wfs/2.0/wfs.xsd">"#,
                "<fes:PropertyIsEqualTo><fes:PropertyName>identificatie</fes:PropertyName>",
                "<fes:Literal>{}</fes:Literal></fes:PropertyIsEqualTo></fes:Filter>"
            ),
            escape_xml(object_id)
        );

        with_query(
            &self.upstreams.bag_wfs,
            [
                ("service", "wfs"),
                ("version", "2.0.0"),
                ("request", "getfeature"),
                ("typeName", "bag:verblijfsobject"),
                ("outputformat", "application/json"),
                ("srsName", "EPSG:4326"),
                ("filter", filter.as_str()),
            ],
        )
    }

    /// Kadaster parcel under the centre of `bbox`
    pub fn cadastral_parcel(&self, bbox: &str) -> Url {
        with_query(
            &self.upstreams.kadaster_wms,
            [
                ("SERVICE", "WMS"),
                ("VERSION", "1.3.0"),
                ("REQUEST", "GetFeatureInfo"),
                ("QUERY_LAYERS", "Perceelvlak"),
                ("layers", "Perceelvlak"),
                ("INFO_FORMAT", "application/json"),
                ("FEATURE_COUNT", "1"),
                ("I", "2"),
                ("J", "2"),
                ("CRS", "EPSG:28992"),
                ("STYLES", ""),
                ("WIDTH", "5"),
                ("HEIGHT", "5"),
                ("BBOX", bbox),
            ],
        )
    }

    /// BAG dwelling objects within the search radius of `point`
    pub fn dwelling_objects_near(&self, point: Coordinate) -> Url {
        self.radius_search("bag:verblijfsobject", point)
    }

    /// BAG building footprints within the search radius of `point`
    pub fn footprints_near(&self, point: Coordinate) -> Url {
        self.radius_search("bag:pand", point)
    }

    fn radius_search(&self, type_name: &str, point: Coordinate) -> Url {
        let filter = format!(
            "<Filter><DWithin><PropertyName>Geometry</PropertyName><gml:Point><gml:coordinates>{point}</gml:coordinates></gml:Point><Distance units='m'>{}</Distance></DWithin></Filter>",
            self.search_radius_m
        );

        with_query(
            &self.upstreams.bag_wfs,
            [
                ("service", "WFS"),
                ("version", "2.0.0"),
                ("request", "GetFeature"),
                ("count", RADIUS_SEARCH_COUNT),
                ("outputFormat", "application/json"),
                ("srsName", "EPSG:4326"),
                ("typeName", type_name),
                ("Filter", filter.as_str()),
            ],
        )
    }

    /// National energy label address check, if that registry is configured
    pub fn national_label(&self, object_id: &str) -> Option<Url> {
        let base = self.upstreams.national_label.as_ref()?;
        Some(self.forwarded(&with_query(base, [("id", object_id)])))
    }

    /// CBS neighbourhood statistics intersecting `bbox`, if configured
    pub fn statistics(&self, bbox: &str) -> Option<Url> {
        let base = self.upstreams.statistics.as_ref()?;
        Some(with_query(
            base,
            [
                ("service", "WFS"),
                ("version", "2.0.0"),
                ("request", "GetFeature"),
                ("typeName", "wijkenbuurten:buurten"),
                ("outputFormat", "application/json"),
                ("srsName", "EPSG:28992"),
                ("bbox", bbox),
            ],
        ))
    }

    /// Dwelling type feature info as XML, through the forwarding service
    pub fn dwelling_type_xml(&self, bbox: &str) -> Url {
        let target = with_query(
            &self.upstreams.woningtype_wms,
            [
                ("DPI", "120"),
                ("map", "/usr/lib/cgi-bin/projects/gebouw_woningtype.qgs"),
                ("SERVICE", "WMS"),
                ("VERSION", "1.3.0"),
                ("REQUEST", "GetFeatureInfo"),
                ("CRS", "EPSG:28992"),
                ("WIDTH", "937"),
                ("HEIGHT", "842"),
                ("LAYERS", "gebouw"),
                ("STYLES", ""),
                ("FORMAT", "image/jpeg"),
                ("QUERY_LAYERS", "gebouw"),
                ("INFO_FORMAT", "text/xml"),
                ("I", "611"),
                ("J", "469"),
                ("FEATURE_COUNT", "10"),
                ("bbox", bbox),
            ],
        );
        self.forwarded(&target)
    }

    fn forwarded(&self, target: &Url) -> Url {
        with_query(&self.upstreams.forward_proxy, [("url", target.as_str())])
    }
}
