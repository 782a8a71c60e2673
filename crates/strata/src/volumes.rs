//! Bounding volumes and the plane tests used for culling and level-of-detail
//! selection.
//!
//! Tileset manifests describe tile bounds as one of three shapes: an oriented
//! box, a geographic region, or a sphere. All three support the same two
//! queries the traversal needs: which side of a plane the volume falls on,
//! and the squared distance from a point to the volume.

use glam::{DMat3, DMat4, DVec2, DVec3};

use crate::geodetic::{Cartographic, Ellipsoid, GlobeRectangle};

/// Result of testing a volume against a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullingResult {
    /// Entirely on the side of the plane opposite its normal.
    Outside,
    /// Straddles the plane.
    Intersecting,
    /// Entirely on the side of the plane its normal points toward.
    Inside,
}

/// A plane in Hessian normal form: `normal . point + distance = 0`.
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    normal: DVec3,
    distance: f64,
}

impl Plane {
    /// Create a plane from a unit normal and its signed distance from the
    /// origin.
    #[must_use]
    pub const fn new(normal: DVec3, distance: f64) -> Self {
        Self { normal, distance }
    }

    /// Create the plane through a point with the given unit normal.
    #[must_use]
    pub fn from_point_normal(point: DVec3, normal: DVec3) -> Self {
        Self {
            normal,
            distance: -normal.dot(point),
        }
    }

    /// The plane's unit normal.
    #[must_use]
    pub fn normal(&self) -> DVec3 {
        self.normal
    }

    /// The plane's signed distance from the origin.
    #[must_use]
    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// Signed shortest distance from the point to the plane, positive on the
    /// side the normal points toward.
    #[must_use]
    pub fn point_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }

    /// Orthogonal projection of the point onto the plane.
    #[must_use]
    pub fn project_point(&self, point: DVec3) -> DVec3 {
        point - self.normal * self.point_distance(point)
    }
}

/// Intersect a ray with a plane. Returns `None` when the ray is parallel to
/// the plane or points away from it.
fn ray_plane(origin: DVec3, direction: DVec3, plane: &Plane) -> Option<DVec3> {
    let denominator = plane.normal().dot(direction);
    if denominator.abs() < 1e-15 {
        return None;
    }

    let t = (-plane.distance() - plane.normal().dot(origin)) / denominator;
    if t < 0.0 {
        return None;
    }

    Some(origin + direction * t)
}

/// A bounding sphere.
#[derive(Debug, Clone, Copy)]
pub struct BoundingSphere {
    center: DVec3,
    radius: f64,
}

impl BoundingSphere {
    /// Create a sphere from its center and radius.
    #[must_use]
    pub const fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// The center of the sphere.
    #[must_use]
    pub fn center(&self) -> DVec3 {
        self.center
    }

    /// The radius of the sphere.
    #[must_use]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Which side of the plane the sphere falls on.
    #[must_use]
    pub fn intersect_plane(&self, plane: &Plane) -> CullingResult {
        let distance_to_plane = plane.normal().dot(self.center) + plane.distance();

        if distance_to_plane < -self.radius {
            CullingResult::Outside
        } else if distance_to_plane < self.radius {
            CullingResult::Intersecting
        } else {
            CullingResult::Inside
        }
    }

    /// Squared distance from the position to the nearest point on the
    /// sphere, or zero if the position is inside it.
    #[must_use]
    pub fn distance_squared_to(&self, position: DVec3) -> f64 {
        let distance = (position - self.center).length() - self.radius;
        if distance <= 0.0 { 0.0 } else { distance * distance }
    }

    /// Apply an affine transform. The radius scales by the longest column of
    /// the upper 3x3, so non-uniform scales stay conservative.
    #[must_use]
    pub fn transform(&self, transform: &DMat4) -> Self {
        let scale = DMat3::from_mat4(*transform);
        let uniform_scale = scale
            .col(0)
            .length()
            .max(scale.col(1).length())
            .max(scale.col(2).length());

        Self {
            center: transform.transform_point3(self.center),
            radius: self.radius * uniform_scale,
        }
    }
}

/// An oriented bounding box: a center and three half-axis vectors stored as
/// the columns of a matrix. Each column's direction is an axis of the box
/// and its length is the half-extent along that axis.
#[derive(Debug, Clone, Copy)]
pub struct OrientedBoundingBox {
    center: DVec3,
    half_axes: DMat3,
}

impl OrientedBoundingBox {
    /// Create a box from its center and half-axes matrix.
    #[must_use]
    pub const fn new(center: DVec3, half_axes: DMat3) -> Self {
        Self { center, half_axes }
    }

    /// Create a box from extents measured along the axes of a plane frame.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn from_plane_extents(
        plane_origin: DVec3,
        plane_x_axis: DVec3,
        plane_y_axis: DVec3,
        plane_z_axis: DVec3,
        minimum_x: f64,
        maximum_x: f64,
        minimum_y: f64,
        maximum_y: f64,
        minimum_z: f64,
        maximum_z: f64,
    ) -> Self {
        let axes = DMat3::from_cols(plane_x_axis, plane_y_axis, plane_z_axis);

        let center_offset = DVec3::new(
            (minimum_x + maximum_x) / 2.0,
            (minimum_y + maximum_y) / 2.0,
            (minimum_z + maximum_z) / 2.0,
        );

        let scale = DVec3::new(
            (maximum_x - minimum_x) / 2.0,
            (maximum_y - minimum_y) / 2.0,
            (maximum_z - minimum_z) / 2.0,
        );

        let scaled_half_axes = DMat3::from_cols(
            axes.col(0) * scale.x,
            axes.col(1) * scale.y,
            axes.col(2) * scale.z,
        );

        Self {
            center: plane_origin + axes * center_offset,
            half_axes: scaled_half_axes,
        }
    }

    /// The center of the box.
    #[must_use]
    pub fn center(&self) -> DVec3 {
        self.center
    }

    /// The half-axes of the box as matrix columns.
    #[must_use]
    pub fn half_axes(&self) -> DMat3 {
        self.half_axes
    }

    /// Which side of the plane the box falls on.
    #[must_use]
    pub fn intersect_plane(&self, plane: &Plane) -> CullingResult {
        let normal = plane.normal();

        // Effective radius of the box when projected onto the plane normal.
        let rad_effective = normal.dot(self.half_axes.col(0)).abs()
            + normal.dot(self.half_axes.col(1)).abs()
            + normal.dot(self.half_axes.col(2)).abs();

        let distance_to_plane = normal.dot(self.center) + plane.distance();

        if distance_to_plane <= -rad_effective {
            CullingResult::Outside
        } else if distance_to_plane >= rad_effective {
            CullingResult::Inside
        } else {
            CullingResult::Intersecting
        }
    }

    /// Squared distance from the position to the nearest point on the box,
    /// or zero if the position is inside it.
    #[must_use]
    pub fn distance_squared_to(&self, position: DVec3) -> f64 {
        let offset = position - self.center;

        let u = self.half_axes.col(0);
        let v = self.half_axes.col(1);
        let w = self.half_axes.col(2);

        let u_half = u.length();
        let v_half = v.length();
        let w_half = w.length();

        // Position in the box's local frame.
        let p_prime = DVec3::new(
            offset.dot(u / u_half),
            offset.dot(v / v_half),
            offset.dot(w / w_half),
        );

        let mut distance_squared = 0.0;

        if p_prime.x < -u_half {
            let d = p_prime.x + u_half;
            distance_squared += d * d;
        } else if p_prime.x > u_half {
            let d = p_prime.x - u_half;
            distance_squared += d * d;
        }

        if p_prime.y < -v_half {
            let d = p_prime.y + v_half;
            distance_squared += d * d;
        } else if p_prime.y > v_half {
            let d = p_prime.y - v_half;
            distance_squared += d * d;
        }

        if p_prime.z < -w_half {
            let d = p_prime.z + w_half;
            distance_squared += d * d;
        } else if p_prime.z > w_half {
            let d = p_prime.z - w_half;
            distance_squared += d * d;
        }

        distance_squared
    }

    /// Apply an affine transform to the box.
    #[must_use]
    pub fn transform(&self, transform: &DMat4) -> Self {
        Self {
            center: transform.transform_point3(self.center),
            half_axes: DMat3::from_mat4(*transform) * self.half_axes,
        }
    }
}

/// An east-north-up frame tangent to the ellipsoid, used to fit an oriented
/// box around a region. The origin must lie on or near the surface.
struct EllipsoidTangentPlane {
    origin: DVec3,
    x_axis: DVec3,
    y_axis: DVec3,
    plane: Plane,
}

impl EllipsoidTangentPlane {
    fn new(origin: DVec3, ellipsoid: &Ellipsoid) -> Self {
        let up = ellipsoid.geodetic_surface_normal(origin);

        // At the poles any east direction works; pick +Y to keep the frame
        // right-handed.
        let east = if origin.x.abs() < 1e-10 && origin.y.abs() < 1e-10 {
            DVec3::Y
        } else {
            DVec3::new(-origin.y, origin.x, 0.0).normalize()
        };
        let north = up.cross(east);

        Self {
            origin,
            x_axis: east,
            y_axis: north,
            plane: Plane::from_point_normal(origin, up),
        }
    }

    fn z_axis(&self) -> DVec3 {
        self.plane.normal()
    }

    /// Cast the point along the plane normal (either direction) and return
    /// its coordinates in the east-north axes of the plane.
    fn project_point_to_nearest_on_plane(&self, cartesian: DVec3) -> DVec2 {
        let normal = self.plane.normal();
        let intersection = ray_plane(cartesian, normal, &self.plane)
            .or_else(|| ray_plane(cartesian, -normal, &self.plane))
            .unwrap_or(cartesian);

        let v = intersection - self.origin;
        DVec2::new(self.x_axis.dot(v), self.y_axis.dot(v))
    }
}

/// A bounding volume given as a longitude/latitude rectangle and a height
/// range over the WGS84 ellipsoid.
///
/// Plane tests are answered by a fitted oriented box; distance queries use
/// the region's own boundary planes, which hug the curved surface more
/// tightly than the box does.
#[derive(Debug, Clone, Copy)]
pub struct BoundingRegion {
    rectangle: GlobeRectangle,
    minimum_height: f64,
    maximum_height: f64,
    bounding_box: OrientedBoundingBox,
    southwest_corner: DVec3,
    northeast_corner: DVec3,
    west_normal: DVec3,
    east_normal: DVec3,
    south_normal: DVec3,
    north_normal: DVec3,
}

impl BoundingRegion {
    /// Create a region over the WGS84 ellipsoid.
    #[must_use]
    pub fn new(rectangle: GlobeRectangle, minimum_height: f64, maximum_height: f64) -> Self {
        let ellipsoid = &Ellipsoid::WGS84;

        let mut southwest_corner = ellipsoid.cartographic_to_cartesian(rectangle.southwest());
        let mut northeast_corner = ellipsoid.cartographic_to_cartesian(rectangle.northeast());

        // The middle latitude on the western edge.
        let western_midpoint = ellipsoid.cartographic_to_cartesian(Cartographic::new(
            rectangle.west(),
            (rectangle.south() + rectangle.north()) * 0.5,
            0.0,
        ));

        let west_normal = western_midpoint.cross(DVec3::Z).normalize();

        // The middle latitude on the eastern edge.
        let eastern_midpoint = ellipsoid.cartographic_to_cartesian(Cartographic::new(
            rectangle.east(),
            (rectangle.south() + rectangle.north()) * 0.5,
            0.0,
        ));

        let east_normal = DVec3::Z.cross(eastern_midpoint).normalize();

        let west_vector = western_midpoint - eastern_midpoint;
        let east_west_normal = west_vector.normalize();

        // For rectangles entirely above the equator, a southern plane
        // through the corner would cut into the region; slide the corner
        // until the plane clears it. Mirrored below for the north.
        let south = rectangle.south();
        let south_surface_normal = if south > 0.0 {
            let south_center = ellipsoid.cartographic_to_cartesian(Cartographic::new(
                (rectangle.west() + rectangle.east()) * 0.5,
                south,
                0.0,
            ));
            let west_plane = Plane::from_point_normal(southwest_corner, west_normal);
            if let Some(point) = ray_plane(south_center, east_west_normal, &west_plane) {
                southwest_corner = point;
            }
            ellipsoid.geodetic_surface_normal(south_center)
        } else {
            ellipsoid.geodetic_surface_normal_cartographic(rectangle.southeast())
        };
        let south_normal = south_surface_normal.cross(west_vector).normalize();

        let north = rectangle.north();
        let north_surface_normal = if north < 0.0 {
            let north_center = ellipsoid.cartographic_to_cartesian(Cartographic::new(
                (rectangle.west() + rectangle.east()) * 0.5,
                north,
                0.0,
            ));
            let east_plane = Plane::from_point_normal(northeast_corner, east_normal);
            if let Some(point) = ray_plane(north_center, -east_west_normal, &east_plane) {
                northeast_corner = point;
            }
            ellipsoid.geodetic_surface_normal(north_center)
        } else {
            ellipsoid.geodetic_surface_normal_cartographic(rectangle.northwest())
        };
        let north_normal = west_vector.cross(north_surface_normal).normalize();

        Self {
            rectangle,
            minimum_height,
            maximum_height,
            bounding_box: Self::compute_bounding_box(
                &rectangle,
                minimum_height,
                maximum_height,
                ellipsoid,
            ),
            southwest_corner,
            northeast_corner,
            west_normal,
            east_normal,
            south_normal,
            north_normal,
        }
    }

    /// The geographic rectangle of the region.
    #[must_use]
    pub fn rectangle(&self) -> &GlobeRectangle {
        &self.rectangle
    }

    /// The minimum height of the region above the ellipsoid, in meters.
    #[must_use]
    pub fn minimum_height(&self) -> f64 {
        self.minimum_height
    }

    /// The maximum height of the region above the ellipsoid, in meters.
    #[must_use]
    pub fn maximum_height(&self) -> f64 {
        self.maximum_height
    }

    /// The oriented box fitted around the region.
    #[must_use]
    pub fn bounding_box(&self) -> &OrientedBoundingBox {
        &self.bounding_box
    }

    /// Which side of the plane the region falls on, answered by the fitted
    /// box.
    #[must_use]
    pub fn intersect_plane(&self, plane: &Plane) -> CullingResult {
        self.bounding_box.intersect_plane(plane)
    }

    /// Squared distance from the position to the region, or zero if the
    /// position is inside it.
    #[must_use]
    pub fn distance_squared_to(&self, position: DVec3) -> f64 {
        let Some(cartographic) = Ellipsoid::WGS84.cartesian_to_cartographic(position) else {
            return 0.0;
        };

        let mut result = 0.0;

        if !self.rectangle.contains(cartographic) {
            let from_southwest = position - self.southwest_corner;
            let distance_to_west_plane = from_southwest.dot(self.west_normal);
            let distance_to_south_plane = from_southwest.dot(self.south_normal);

            let from_northeast = position - self.northeast_corner;
            let distance_to_east_plane = from_northeast.dot(self.east_normal);
            let distance_to_north_plane = from_northeast.dot(self.north_normal);

            if distance_to_west_plane > 0.0 {
                result += distance_to_west_plane * distance_to_west_plane;
            } else if distance_to_east_plane > 0.0 {
                result += distance_to_east_plane * distance_to_east_plane;
            }

            if distance_to_south_plane > 0.0 {
                result += distance_to_south_plane * distance_to_south_plane;
            } else if distance_to_north_plane > 0.0 {
                result += distance_to_north_plane * distance_to_north_plane;
            }
        }

        let camera_height = cartographic.height;
        if camera_height > self.maximum_height {
            let distance_above_top = camera_height - self.maximum_height;
            result += distance_above_top * distance_above_top;
        } else if camera_height < self.minimum_height {
            let distance_below_bottom = self.minimum_height - camera_height;
            result += distance_below_bottom * distance_below_bottom;
        }

        result
    }

    fn compute_bounding_box(
        rectangle: &GlobeRectangle,
        minimum_height: f64,
        maximum_height: f64,
        ellipsoid: &Ellipsoid,
    ) -> OrientedBoundingBox {
        if rectangle.compute_width() <= std::f64::consts::PI {
            // Align the box with the tangent plane at the center of the
            // rectangle.
            let tangent_point_cartographic = rectangle.compute_center();
            let tangent_point = ellipsoid.cartographic_to_cartesian(tangent_point_cartographic);
            let tangent_plane = EllipsoidTangentPlane::new(tangent_point, ellipsoid);

            // If the rectangle spans the equator, the center-west point is
            // instead taken at the equator, where the surface bulges out the
            // farthest.
            let lon_center = tangent_point_cartographic.longitude;
            let lat_center = if rectangle.south() < 0.0 && rectangle.north() > 0.0 {
                0.0
            } else {
                tangent_point_cartographic.latitude
            };

            // XY extents come from the rectangle perimeter at maximum
            // height.
            let corner = |longitude: f64, latitude: f64, height: f64| {
                ellipsoid.cartographic_to_cartesian(Cartographic::new(longitude, latitude, height))
            };

            let perimeter_nc = corner(lon_center, rectangle.north(), maximum_height);
            let perimeter_nw = corner(rectangle.west(), rectangle.north(), maximum_height);
            let perimeter_cw = corner(rectangle.west(), lat_center, maximum_height);
            let perimeter_sw = corner(rectangle.west(), rectangle.south(), maximum_height);
            let perimeter_sc = corner(lon_center, rectangle.south(), maximum_height);

            let projected_nc = tangent_plane.project_point_to_nearest_on_plane(perimeter_nc);
            let projected_nw = tangent_plane.project_point_to_nearest_on_plane(perimeter_nw);
            let projected_cw = tangent_plane.project_point_to_nearest_on_plane(perimeter_cw);
            let projected_sw = tangent_plane.project_point_to_nearest_on_plane(perimeter_sw);
            let projected_sc = tangent_plane.project_point_to_nearest_on_plane(perimeter_sc);

            let min_x = projected_nw.x.min(projected_cw.x).min(projected_sw.x);
            let max_x = -min_x; // symmetrical

            let max_y = projected_nw.y.max(projected_nc.y);
            let min_y = projected_sw.y.min(projected_sc.y);

            // The minimum Z comes from the western corners at minimum
            // height, which sit deeper below the tangent plane than any
            // point at maximum height.
            let bottom_nw = corner(rectangle.west(), rectangle.north(), minimum_height);
            let bottom_sw = corner(rectangle.west(), rectangle.south(), minimum_height);

            let min_z = tangent_plane
                .plane
                .point_distance(bottom_nw)
                .min(tangent_plane.plane.point_distance(bottom_sw));
            // The tangent plane touches the surface at height zero.
            let max_z = maximum_height;

            return OrientedBoundingBox::from_plane_extents(
                tangent_plane.origin,
                tangent_plane.x_axis,
                tangent_plane.y_axis,
                tangent_plane.z_axis(),
                min_x,
                max_x,
                min_y,
                max_y,
                min_z,
                max_z,
            );
        }

        // The rectangle wraps around more than half the ellipsoid. Fit a box
        // around a plane that faces the rectangle's center longitude at the
        // latitude nearest the equator and rotates around the Z axis.
        let fully_above_equator = rectangle.south() > 0.0;
        let fully_below_equator = rectangle.north() < 0.0;
        let latitude_nearest_to_equator = if fully_above_equator {
            rectangle.south()
        } else if fully_below_equator {
            rectangle.north()
        } else {
            0.0
        };
        let center_longitude = rectangle.compute_center().longitude;

        let mut plane_origin = ellipsoid.cartographic_to_cartesian(Cartographic::new(
            center_longitude,
            latitude_nearest_to_equator,
            maximum_height,
        ));
        // Center the plane on the equator to simplify the normal.
        plane_origin.z = 0.0;

        let is_pole = plane_origin.x.abs() < 1e-10 && plane_origin.y.abs() < 1e-10;
        let plane_normal = if is_pole {
            DVec3::X
        } else {
            plane_origin.normalize()
        };
        let plane_y_axis = DVec3::Z;
        let plane_x_axis = plane_normal.cross(plane_y_axis);
        let plane = Plane::from_point_normal(plane_origin, plane_normal);

        // The horizon point is the farthest extent in the plane's X
        // dimension.
        let horizon = ellipsoid.cartographic_to_cartesian(Cartographic::new(
            center_longitude + std::f64::consts::FRAC_PI_2,
            latitude_nearest_to_equator,
            maximum_height,
        ));
        let max_x = plane.project_point(horizon).dot(plane_x_axis);
        let min_x = -max_x; // symmetrical

        // Min and max Y use whichever height gives the larger extent.
        let max_y = ellipsoid
            .cartographic_to_cartesian(Cartographic::new(
                0.0,
                rectangle.north(),
                if fully_below_equator {
                    minimum_height
                } else {
                    maximum_height
                },
            ))
            .z;
        let min_y = ellipsoid
            .cartographic_to_cartesian(Cartographic::new(
                0.0,
                rectangle.south(),
                if fully_above_equator {
                    minimum_height
                } else {
                    maximum_height
                },
            ))
            .z;

        let far_z = ellipsoid.cartographic_to_cartesian(Cartographic::new(
            rectangle.east(),
            latitude_nearest_to_equator,
            maximum_height,
        ));
        let min_z = plane.point_distance(far_z);
        // The plane origin already sits at the maximum height.
        let max_z = 0.0;

        OrientedBoundingBox::from_plane_extents(
            plane_origin,
            plane_x_axis,
            plane_y_axis,
            plane_normal,
            min_x,
            max_x,
            min_y,
            max_y,
            min_z,
            max_z,
        )
    }
}

/// A tile's bounding volume in any of the three manifest shapes.
#[derive(Debug, Clone, Copy)]
#[allow(clippy::large_enum_variant)]
pub enum BoundingVolume {
    /// An oriented bounding box.
    Box(OrientedBoundingBox),
    /// A geographic region over the WGS84 ellipsoid.
    Region(BoundingRegion),
    /// A bounding sphere.
    Sphere(BoundingSphere),
}

impl BoundingVolume {
    /// Which side of the plane the volume falls on.
    #[must_use]
    pub fn intersect_plane(&self, plane: &Plane) -> CullingResult {
        match self {
            BoundingVolume::Box(b) => b.intersect_plane(plane),
            BoundingVolume::Region(r) => r.intersect_plane(plane),
            BoundingVolume::Sphere(s) => s.intersect_plane(plane),
        }
    }

    /// Squared distance from the position to the volume, or zero if the
    /// position is inside it.
    #[must_use]
    pub fn distance_squared_to(&self, position: DVec3) -> f64 {
        match self {
            BoundingVolume::Box(b) => b.distance_squared_to(position),
            BoundingVolume::Region(r) => r.distance_squared_to(position),
            BoundingVolume::Sphere(s) => s.distance_squared_to(position),
        }
    }

    /// The center of the volume in world coordinates.
    #[must_use]
    pub fn center(&self) -> DVec3 {
        match self {
            BoundingVolume::Box(b) => b.center(),
            BoundingVolume::Region(r) => r.bounding_box().center(),
            BoundingVolume::Sphere(s) => s.center(),
        }
    }

    /// Apply an affine transform. Regions are geodetic and unaffected.
    #[must_use]
    pub fn transform(&self, transform: &DMat4) -> Self {
        match self {
            BoundingVolume::Box(b) => BoundingVolume::Box(b.transform(transform)),
            BoundingVolume::Region(r) => BoundingVolume::Region(*r),
            BoundingVolume::Sphere(s) => BoundingVolume::Sphere(s.transform(transform)),
        }
    }
}
