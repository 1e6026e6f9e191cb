//! Product filter / sort parsing
//!
//! Raw filters arrive as `{"price_range": ["100,500"], "category_ids": ["1","2"]}`.
//! They are parsed into a typed [`ProductFilter`] before any query is built, so
//! an unknown key or a malformed range fails at the boundary.

use std::cmp::Ordering;
use std::collections::HashMap;

use shared::error::AppError;
use shared::models::Product;

/// Inclusive `min,max` range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeFilter<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> RangeFilter<T> {
    pub fn contains(&self, v: T) -> bool {
        self.min <= v && v <= self.max
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductFilter {
    /// Minimum variant price
    pub price: Option<RangeFilter<i64>>,
    pub rating: Option<RangeFilter<f64>>,
    pub selling: Option<RangeFilter<i64>>,
    pub visited: Option<RangeFilter<i64>>,
    pub review: Option<RangeFilter<i64>>,
    pub weight: Option<RangeFilter<i64>>,
    /// created_at, epoch millis
    pub added: Option<RangeFilter<i64>>,
    /// updated_at, epoch millis
    pub updated: Option<RangeFilter<i64>>,
    /// Coupon value
    pub coupon: Option<RangeFilter<i64>>,
    pub category_ids: Vec<i64>,
    pub product_ids: Vec<i64>,
    pub badge_ids: Vec<i64>,
    pub attribute_ids: Vec<i64>,
    pub variant_ids: Vec<i64>,
    pub free_send: Option<bool>,
}

fn first<'a>(key: &str, values: &'a [String]) -> Result<&'a str, AppError> {
    values
        .first()
        .map(|s| s.trim())
        .ok_or_else(|| AppError::invalid_field(key, "value is required"))
}

fn parse_range<T: std::str::FromStr + PartialOrd>(
    key: &str,
    values: &[String],
) -> Result<RangeFilter<T>, AppError> {
    let raw = first(key, values)?;
    let (min, max) = raw
        .split_once(',')
        .ok_or_else(|| AppError::invalid_field(key, "expected \"min,max\""))?;
    let min: T = min
        .trim()
        .parse()
        .map_err(|_| AppError::invalid_field(key, "invalid range minimum"))?;
    let max: T = max
        .trim()
        .parse()
        .map_err(|_| AppError::invalid_field(key, "invalid range maximum"))?;
    if min > max {
        return Err(AppError::invalid_field(key, "range minimum exceeds maximum"));
    }
    Ok(RangeFilter { min, max })
}

/// Date ranges accept epoch millis or RFC 3339 on either side
fn parse_time_range(key: &str, values: &[String]) -> Result<RangeFilter<i64>, AppError> {
    let raw = first(key, values)?;
    let (min, max) = raw
        .split_once(',')
        .ok_or_else(|| AppError::invalid_field(key, "expected \"min,max\""))?;
    let parse = |s: &str| {
        let s = s.trim();
        s.parse::<i64>()
            .ok()
            .or_else(|| shared::util::rfc3339_to_millis(s))
            .ok_or_else(|| AppError::invalid_field(key, "invalid timestamp"))
    };
    let range = RangeFilter {
        min: parse(min)?,
        max: parse(max)?,
    };
    if range.min > range.max {
        return Err(AppError::invalid_field(key, "range minimum exceeds maximum"));
    }
    Ok(range)
}

fn parse_ids(key: &str, values: &[String]) -> Result<Vec<i64>, AppError> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| AppError::invalid_field(key, format!("invalid id: {s}")))
        })
        .collect()
}

impl ProductFilter {
    pub fn parse(raw: &HashMap<String, Vec<String>>) -> Result<Self, AppError> {
        let mut filter = ProductFilter::default();
        for (key, values) in raw {
            let k = key.as_str();
            match k {
                "price_range" => filter.price = Some(parse_range(k, values)?),
                "rating_range" => filter.rating = Some(parse_range(k, values)?),
                "selling_range" => filter.selling = Some(parse_range(k, values)?),
                "visited_range" => filter.visited = Some(parse_range(k, values)?),
                "review_range" => filter.review = Some(parse_range(k, values)?),
                "weight_range" => filter.weight = Some(parse_range(k, values)?),
                "added_range" => filter.added = Some(parse_time_range(k, values)?),
                "updated_range" => filter.updated = Some(parse_time_range(k, values)?),
                "coupon_range" => filter.coupon = Some(parse_range(k, values)?),
                "category_ids" => filter.category_ids = parse_ids(k, values)?,
                "product_ids" => filter.product_ids = parse_ids(k, values)?,
                "badges" => filter.badge_ids = parse_ids(k, values)?,
                "product_attributes" => filter.attribute_ids = parse_ids(k, values)?,
                "product_variant" => filter.variant_ids = parse_ids(k, values)?,
                "free_send" => {
                    filter.free_send = Some(match first(k, values)? {
                        "true" | "1" => true,
                        "false" | "0" => false,
                        _ => return Err(AppError::invalid_field(k, "expected true or false")),
                    })
                }
                other => return Err(AppError::invalid_field(other, "unknown filter")),
            }
        }
        Ok(filter)
    }

    /// In-process evaluation, mirrors the SQL built by the MySQL store
    pub fn matches(&self, p: &Product) -> bool {
        let in_range = |r: &Option<RangeFilter<i64>>, v: i64| r.as_ref().is_none_or(|r| r.contains(v));
        let any_of = |wanted: &[i64], have: &[i64]| {
            wanted.is_empty() || wanted.iter().any(|id| have.contains(id))
        };
        let variant_ids: Vec<i64> = p.variants.iter().map(|v| v.id).collect();

        in_range(&self.price, p.min_price())
            && self.rating.as_ref().is_none_or(|r| r.contains(p.rate))
            && in_range(&self.selling, p.selling_count)
            && in_range(&self.visited, p.visited_count)
            && in_range(&self.review, p.review_count)
            && in_range(&self.weight, p.weight)
            && in_range(&self.added, p.created_at)
            && in_range(&self.updated, p.updated_at)
            && self
                .coupon
                .as_ref()
                .is_none_or(|r| p.coupon.as_ref().is_some_and(|c| r.contains(c.value)))
            && any_of(&self.category_ids, &p.category_ids)
            && (self.product_ids.is_empty() || self.product_ids.contains(&p.id))
            && any_of(&self.badge_ids, &p.badge_ids)
            && any_of(&self.attribute_ids, &p.attribute_ids)
            && any_of(&self.variant_ids, &variant_ids)
            && self.free_send.is_none_or(|f| f == p.free_send)
    }
}

/// Product sort orders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKind {
    PriceLowToHigh,
    PriceHighToLow,
    CouponHighToLow,
    NameAZ,
    NameZA,
    RecentlyAdded,
    #[default]
    RecentlyUpdated,
    MostSelling,
    LeastSelling,
    MostVisited,
    LeastVisited,
    MostRated,
    LeastRated,
    MostReviewed,
    LeastReviewed,
}

impl std::str::FromStr for SortKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "price_low_to_high" => SortKind::PriceLowToHigh,
            "price_high_to_low" => SortKind::PriceHighToLow,
            "coupon_high_to_low" => SortKind::CouponHighToLow,
            "name_a_z" => SortKind::NameAZ,
            "name_z_a" => SortKind::NameZA,
            "recently_added" => SortKind::RecentlyAdded,
            "recently_updated" => SortKind::RecentlyUpdated,
            "most_selling" => SortKind::MostSelling,
            "least_selling" => SortKind::LeastSelling,
            "most_visited" => SortKind::MostVisited,
            "least_visited" => SortKind::LeastVisited,
            "most_rated" => SortKind::MostRated,
            "least_rated" => SortKind::LeastRated,
            "most_reviewed" => SortKind::MostReviewed,
            "least_reviewed" => SortKind::LeastReviewed,
            other => return Err(AppError::invalid_field("sort", format!("unknown sort: {other}"))),
        })
    }
}

impl SortKind {
    /// ORDER BY clause over the `p` alias (`min_price` / `coupon_value` are computed columns)
    pub fn sql_order_by(&self) -> &'static str {
        match self {
            SortKind::PriceLowToHigh => "min_price ASC, p.id ASC",
            SortKind::PriceHighToLow => "min_price DESC, p.id ASC",
            SortKind::CouponHighToLow => "coupon_value DESC, p.id ASC",
            SortKind::NameAZ => "p.name ASC, p.id ASC",
            SortKind::NameZA => "p.name DESC, p.id ASC",
            SortKind::RecentlyAdded => "p.created_at DESC, p.id DESC",
            SortKind::RecentlyUpdated => "p.updated_at DESC, p.id DESC",
            SortKind::MostSelling => "p.selling_count DESC, p.id ASC",
            SortKind::LeastSelling => "p.selling_count ASC, p.id ASC",
            SortKind::MostVisited => "p.visited_count DESC, p.id ASC",
            SortKind::LeastVisited => "p.visited_count ASC, p.id ASC",
            SortKind::MostRated => "p.rate DESC, p.id ASC",
            SortKind::LeastRated => "p.rate ASC, p.id ASC",
            SortKind::MostReviewed => "p.review_count DESC, p.id ASC",
            SortKind::LeastReviewed => "p.review_count ASC, p.id ASC",
        }
    }

    pub fn compare(&self, a: &Product, b: &Product) -> Ordering {
        let coupon = |p: &Product| p.coupon.as_ref().map_or(0, |c| c.value);
        let primary = match self {
            SortKind::PriceLowToHigh => a.min_price().cmp(&b.min_price()),
            SortKind::PriceHighToLow => b.min_price().cmp(&a.min_price()),
            SortKind::CouponHighToLow => coupon(b).cmp(&coupon(a)),
            SortKind::NameAZ => a.name.cmp(&b.name),
            SortKind::NameZA => b.name.cmp(&a.name),
            SortKind::RecentlyAdded => return b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)),
            SortKind::RecentlyUpdated => return b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)),
            SortKind::MostSelling => b.selling_count.cmp(&a.selling_count),
            SortKind::LeastSelling => a.selling_count.cmp(&b.selling_count),
            SortKind::MostVisited => b.visited_count.cmp(&a.visited_count),
            SortKind::LeastVisited => a.visited_count.cmp(&b.visited_count),
            SortKind::MostRated => b.rate.total_cmp(&a.rate),
            SortKind::LeastRated => a.rate.total_cmp(&b.rate),
            SortKind::MostReviewed => b.review_count.cmp(&a.review_count),
            SortKind::LeastReviewed => a.review_count.cmp(&b.review_count),
        };
        primary.then(a.id.cmp(&b.id))
    }
}
