//! 地理围栏计算
//!
//! 使用 Haversine 公式计算两点间的大圆距离。

use crate::error::ApiError;

/// 地球平均半径（公里）
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// 经纬度坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// 创建坐标，纬度须在 [-90, 90]，经度须在 [-180, 180]
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ApiError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ApiError::Validation("纬度必须介于 -90 与 90 之间".to_string()));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ApiError::Validation("经度必须介于 -180 与 180 之间".to_string()));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// 两个可选分量都存在时才构成坐标
    pub fn from_optional(
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<Option<Self>, ApiError> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Self::new(lat, lon).map(Some),
            (None, None) => Ok(None),
            _ => Err(ApiError::Validation("纬度与经度必须同时提供".to_string())),
        }
    }
}

/// 两点间距离（公里）
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// 两点间距离（公尺）
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    distance_km(a, b) * 1000.0
}

/// 判断是否在半径（公尺）之内，边界视为范围内
pub fn within_radius(a: GeoPoint, b: GeoPoint, radius_meters: f64) -> bool {
    distance_meters(a, b) <= radius_meters
}

/// 保留两位小数
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn test_same_point_is_zero() {
        let p = point(25.0375, 121.5637);
        assert_eq!(distance_km(p, p), 0.0);
        assert!(within_radius(p, p, 0.0));
    }

    #[test]
    fn test_known_distance() {
        // 台北 101 到台北车站约 5 公里
        let taipei_101 = point(25.0340, 121.5645);
        let main_station = point(25.0478, 121.5170);
        let d = distance_km(taipei_101, main_station);
        assert!((4.8..5.3).contains(&d), "distance = {d}");
    }

    #[test]
    fn test_one_degree_latitude() {
        let d = distance_km(point(0.0, 0.0), point(1.0, 0.0));
        assert!((d - 111.19).abs() < 0.05, "distance = {d}");
    }

    #[test]
    fn test_symmetric() {
        let a = point(22.6273, 120.3014);
        let b = point(23.9917, 121.6112);
        assert!((distance_km(a, b) - distance_km(b, a)).abs() < 1e-9);
    }

    #[test]
    fn test_within_radius_boundary() {
        let temple = point(25.0330, 121.5654);
        let nearby = point(25.0335, 121.5654);
        let d = distance_meters(temple, nearby);
        assert!(d > 50.0 && d < 60.0, "distance = {d}");
        assert!(within_radius(temple, nearby, 100.0));
        assert!(!within_radius(temple, nearby, 30.0));
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(GeoPoint::new(90.0, 180.0).is_ok());
        assert!(GeoPoint::new(-90.0, -180.0).is_ok());
        assert!(GeoPoint::new(90.1, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_from_optional() {
        assert_eq!(GeoPoint::from_optional(None, None).unwrap(), None);
        assert!(GeoPoint::from_optional(Some(25.0), Some(121.0)).unwrap().is_some());
        assert!(GeoPoint::from_optional(Some(25.0), None).is_err());
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(4.56789), 4.57);
        assert_eq!(round2(0.004), 0.0);
    }
}
