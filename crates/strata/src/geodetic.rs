//! Geodetic coordinates and the reference ellipsoid.
//!
//! Positions on the globe are expressed either as earth-centered cartesian
//! vectors or as [`Cartographic`] longitude/latitude/height triples relative
//! to an [`Ellipsoid`]. Bounding regions in tileset manifests are always
//! defined against [`Ellipsoid::WGS84`].

use glam::DVec3;

use std::f64::consts::PI;

const TWO_PI: f64 = 2.0 * PI;

/// Geodetic coordinates: longitude and latitude in radians, height in
/// meters above the ellipsoid surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cartographic {
    /// Longitude in radians, positive east.
    pub longitude: f64,
    /// Latitude in radians, positive north.
    pub latitude: f64,
    /// Height in meters above the ellipsoid surface.
    pub height: f64,
}

impl Cartographic {
    /// Create coordinates from radians.
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }

    /// Create coordinates from degrees.
    #[must_use]
    pub fn from_degrees(longitude: f64, latitude: f64, height: f64) -> Self {
        Self::new(longitude.to_radians(), latitude.to_radians(), height)
    }
}

/// A quadratic surface of revolution centered at the origin, used to model
/// the shape of the planet.
#[derive(Debug, Clone, Copy)]
pub struct Ellipsoid {
    radii: DVec3,
    radii_squared: DVec3,
    one_over_radii: DVec3,
    one_over_radii_squared: DVec3,
    center_tolerance_squared: f64,
}

impl Ellipsoid {
    /// The WGS84 reference ellipsoid.
    pub const WGS84: Self = Self::new(6_378_137.0, 6_378_137.0, 6_356_752.314_245_179_3);

    /// Create an ellipsoid with the given radii along the x, y, and z axes.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            radii: DVec3::new(x, y, z),
            radii_squared: DVec3::new(x * x, y * y, z * z),
            one_over_radii: DVec3::new(1.0 / x, 1.0 / y, 1.0 / z),
            one_over_radii_squared: DVec3::new(1.0 / (x * x), 1.0 / (y * y), 1.0 / (z * z)),
            // Surface projection does not converge near the center.
            center_tolerance_squared: 0.1,
        }
    }

    /// The radii along the x, y, and z axes, in meters.
    #[must_use]
    pub fn radii(&self) -> DVec3 {
        self.radii
    }

    /// Unit normal to the ellipsoid surface at the surface point nearest to
    /// the given cartesian position.
    #[must_use]
    pub fn geodetic_surface_normal(&self, position: DVec3) -> DVec3 {
        (position * self.one_over_radii_squared).normalize()
    }

    /// Unit normal to the ellipsoid surface at the given geodetic
    /// coordinates.
    #[must_use]
    pub fn geodetic_surface_normal_cartographic(&self, cartographic: Cartographic) -> DVec3 {
        let cos_latitude = cartographic.latitude.cos();
        DVec3::new(
            cos_latitude * cartographic.longitude.cos(),
            cos_latitude * cartographic.longitude.sin(),
            cartographic.latitude.sin(),
        )
        .normalize()
    }

    /// Convert geodetic coordinates to an earth-centered cartesian position.
    #[must_use]
    pub fn cartographic_to_cartesian(&self, cartographic: Cartographic) -> DVec3 {
        let n = self.geodetic_surface_normal_cartographic(cartographic);
        let k = self.radii_squared * n;
        let gamma = n.dot(k).sqrt();
        k / gamma + n * cartographic.height
    }

    /// Convert an earth-centered cartesian position to geodetic coordinates.
    ///
    /// Returns `None` for positions so close to the center of the ellipsoid
    /// that the surface projection does not converge.
    #[must_use]
    pub fn cartesian_to_cartographic(&self, cartesian: DVec3) -> Option<Cartographic> {
        let p = self.scale_to_geodetic_surface(cartesian)?;
        let n = self.geodetic_surface_normal(p);
        let h = cartesian - p;

        let longitude = n.y.atan2(n.x);
        let latitude = n.z.asin();
        let height = sign(h.dot(cartesian)) * h.length();

        Some(Cartographic::new(longitude, latitude, height))
    }

    /// Project a cartesian position along the geodetic normal onto the
    /// ellipsoid surface.
    fn scale_to_geodetic_surface(&self, cartesian: DVec3) -> Option<DVec3> {
        let one_over_radii = self.one_over_radii;
        let x2 = cartesian.x * cartesian.x * one_over_radii.x * one_over_radii.x;
        let y2 = cartesian.y * cartesian.y * one_over_radii.y * one_over_radii.y;
        let z2 = cartesian.z * cartesian.z * one_over_radii.z * one_over_radii.z;

        // Squared ellipsoid norm.
        let squared_norm = x2 + y2 + z2;
        let ratio = (1.0 / squared_norm).sqrt();

        // As an initial approximation, assume that the radial intersection
        // is the projection point.
        let intersection = cartesian * ratio;

        if squared_norm < self.center_tolerance_squared {
            return ratio.is_finite().then_some(intersection);
        }

        let one_over_radii_squared = self.one_over_radii_squared;

        // Use the gradient at the intersection point in place of the true
        // unit normal. The difference in magnitude is absorbed in the
        // multiplier.
        let gradient = intersection * one_over_radii_squared * 2.0;

        // Initial guess at the normal vector multiplier.
        let mut lambda = (1.0 - ratio) * cartesian.length() / (0.5 * gradient.length());
        let mut correction = 0.0;

        loop {
            lambda -= correction;

            let x_multiplier = 1.0 / (1.0 + lambda * one_over_radii_squared.x);
            let y_multiplier = 1.0 / (1.0 + lambda * one_over_radii_squared.y);
            let z_multiplier = 1.0 / (1.0 + lambda * one_over_radii_squared.z);

            let x_multiplier2 = x_multiplier * x_multiplier;
            let y_multiplier2 = y_multiplier * y_multiplier;
            let z_multiplier2 = z_multiplier * z_multiplier;

            let func = x2 * x_multiplier2 + y2 * y_multiplier2 + z2 * z_multiplier2 - 1.0;
            if func.abs() <= 1e-12 {
                return Some(DVec3::new(
                    cartesian.x * x_multiplier,
                    cartesian.y * y_multiplier,
                    cartesian.z * z_multiplier,
                ));
            }

            let x_multiplier3 = x_multiplier2 * x_multiplier;
            let y_multiplier3 = y_multiplier2 * y_multiplier;
            let z_multiplier3 = z_multiplier2 * z_multiplier;

            let denominator = x2 * x_multiplier3 * one_over_radii_squared.x
                + y2 * y_multiplier3 * one_over_radii_squared.y
                + z2 * z_multiplier3 * one_over_radii_squared.z;
            let derivative = -2.0 * denominator;

            correction = func / derivative;
        }
    }
}

/// A longitude/latitude rectangle on the globe, in radians.
///
/// When `east` is less than `west` the rectangle crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobeRectangle {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
}

impl GlobeRectangle {
    /// Create a rectangle from its edge coordinates in radians.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// The westernmost longitude in radians.
    #[must_use]
    pub fn west(&self) -> f64 {
        self.west
    }

    /// The southernmost latitude in radians.
    #[must_use]
    pub fn south(&self) -> f64 {
        self.south
    }

    /// The easternmost longitude in radians.
    #[must_use]
    pub fn east(&self) -> f64 {
        self.east
    }

    /// The northernmost latitude in radians.
    #[must_use]
    pub fn north(&self) -> f64 {
        self.north
    }

    /// The longitudinal span in radians, accounting for antimeridian
    /// crossings.
    #[must_use]
    pub fn compute_width(&self) -> f64 {
        let mut width = self.east - self.west;
        if self.east < self.west {
            width += TWO_PI;
        }
        width
    }

    /// The latitudinal span in radians.
    #[must_use]
    pub fn compute_height(&self) -> f64 {
        self.north - self.south
    }

    /// The center of the rectangle at height zero.
    #[must_use]
    pub fn compute_center(&self) -> Cartographic {
        let mut east = self.east;
        if east < self.west {
            east += TWO_PI;
        }
        let longitude = negative_pi_to_pi((self.west + east) * 0.5);
        let latitude = (self.south + self.north) * 0.5;
        Cartographic::new(longitude, latitude, 0.0)
    }

    /// Whether the given coordinates fall inside the rectangle. Height is
    /// ignored.
    #[must_use]
    pub fn contains(&self, cartographic: Cartographic) -> bool {
        let mut longitude = cartographic.longitude;
        let latitude = cartographic.latitude;

        let west = self.west;
        let mut east = self.east;
        if east < west {
            east += TWO_PI;
            if longitude < 0.0 {
                longitude += TWO_PI;
            }
        }

        longitude >= west && longitude <= east && latitude >= self.south && latitude <= self.north
    }

    /// The southwest corner at height zero.
    #[must_use]
    pub fn southwest(&self) -> Cartographic {
        Cartographic::new(self.west, self.south, 0.0)
    }

    /// The southeast corner at height zero.
    #[must_use]
    pub fn southeast(&self) -> Cartographic {
        Cartographic::new(self.east, self.south, 0.0)
    }

    /// The northwest corner at height zero.
    #[must_use]
    pub fn northwest(&self) -> Cartographic {
        Cartographic::new(self.west, self.north, 0.0)
    }

    /// The northeast corner at height zero.
    #[must_use]
    pub fn northeast(&self) -> Cartographic {
        Cartographic::new(self.east, self.north, 0.0)
    }
}

/// Wrap an angle to [-pi, pi].
fn negative_pi_to_pi(angle: f64) -> f64 {
    zero_to_two_pi(angle + PI) - PI
}

/// Wrap an angle to [0, 2*pi], keeping exact multiples of a full turn at
/// two pi rather than zero.
fn zero_to_two_pi(angle: f64) -> f64 {
    let m = modulo(angle, TWO_PI);
    if m.abs() < 1e-14 && angle.abs() > 1e-14 {
        return TWO_PI;
    }
    m
}

/// Remainder that always carries the sign of the divisor.
fn modulo(m: f64, n: f64) -> f64 {
    ((m % n) + n) % n
}

/// Sign of the value, propagating zero and NaN unchanged.
fn sign(value: f64) -> f64 {
    if value == 0.0 || value.is_nan() {
        value
    } else if value > 0.0 {
        1.0
    } else {
        -1.0
    }
}
