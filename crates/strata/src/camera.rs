//! The viewer state that drives tile selection.
//!
//! The camera answers the two questions traversal asks about every tile:
//! does its bounding volume intersect the view frustum, and how many screen
//! pixels does its geometric error span at its distance from the viewer.

use glam::{DVec2, DVec3};

use crate::volumes::{BoundingVolume, CullingResult, Plane};

/// The viewer's position, orientation, viewport, and fields of view.
#[derive(Debug, Clone)]
pub struct Camera {
    position: DVec3,
    direction: DVec3,
    up: DVec3,
    viewport_size: DVec2,
    horizontal_field_of_view: f64,
    vertical_field_of_view: f64,
    sse_denominator: f64,
    left_plane: Plane,
    right_plane: Plane,
    top_plane: Plane,
    bottom_plane: Plane,
}

impl Camera {
    /// Create a camera.
    ///
    /// `direction` and `up` must be unit length and orthogonal. The fields
    /// of view are full angles in radians; the viewport size is in pixels.
    #[must_use]
    pub fn new(
        position: DVec3,
        direction: DVec3,
        up: DVec3,
        viewport_size: DVec2,
        horizontal_field_of_view: f64,
        vertical_field_of_view: f64,
    ) -> Self {
        let placeholder = Plane::new(DVec3::Z, 0.0);
        let mut camera = Self {
            position,
            direction,
            up,
            viewport_size,
            horizontal_field_of_view,
            vertical_field_of_view,
            sse_denominator: 2.0 * (0.5 * vertical_field_of_view).tan(),
            left_plane: placeholder,
            right_plane: placeholder,
            top_plane: placeholder,
            bottom_plane: placeholder,
        };
        camera.update_culling_volume();
        camera
    }

    /// The camera position in world coordinates.
    #[must_use]
    pub fn position(&self) -> DVec3 {
        self.position
    }

    /// The unit view direction.
    #[must_use]
    pub fn direction(&self) -> DVec3 {
        self.direction
    }

    /// The unit up vector.
    #[must_use]
    pub fn up(&self) -> DVec3 {
        self.up
    }

    /// The viewport size in pixels.
    #[must_use]
    pub fn viewport_size(&self) -> DVec2 {
        self.viewport_size
    }

    /// Move or re-orient the camera.
    pub fn update_position_and_orientation(
        &mut self,
        position: DVec3,
        direction: DVec3,
        up: DVec3,
    ) {
        self.position = position;
        self.direction = direction;
        self.up = up;

        self.update_culling_volume();
    }

    /// Change the viewport size or fields of view.
    pub fn update_view_parameters(
        &mut self,
        viewport_size: DVec2,
        horizontal_field_of_view: f64,
        vertical_field_of_view: f64,
    ) {
        self.viewport_size = viewport_size;
        self.horizontal_field_of_view = horizontal_field_of_view;
        self.vertical_field_of_view = vertical_field_of_view;
        self.sse_denominator = 2.0 * (0.5 * vertical_field_of_view).tan();

        self.update_culling_volume();
    }

    fn update_culling_volume(&mut self) {
        let top = (0.5 * self.vertical_field_of_view).tan();
        let bottom = -top;
        let right = (0.5 * self.horizontal_field_of_view).tan();
        let left = -right;

        // The side planes pass through the camera position, so the near
        // plane distance only sets proportions; use unit distance.
        let right_axis = self.direction.cross(self.up);
        let near_center = self.position + self.direction;

        let to_left_edge = near_center + right_axis * left - self.position;
        self.left_plane =
            Plane::from_point_normal(self.position, to_left_edge.cross(self.up).normalize());

        let to_right_edge = near_center + right_axis * right - self.position;
        self.right_plane =
            Plane::from_point_normal(self.position, self.up.cross(to_right_edge).normalize());

        let to_bottom_edge = near_center + self.up * bottom - self.position;
        self.bottom_plane =
            Plane::from_point_normal(self.position, right_axis.cross(to_bottom_edge).normalize());

        let to_top_edge = near_center + self.up * top - self.position;
        self.top_plane =
            Plane::from_point_normal(self.position, to_top_edge.cross(right_axis).normalize());
    }

    /// Whether any part of the volume is inside the view frustum.
    #[must_use]
    pub fn is_bounding_volume_visible(&self, bounding_volume: &BoundingVolume) -> bool {
        let planes = [
            &self.left_plane,
            &self.right_plane,
            &self.top_plane,
            &self.bottom_plane,
        ];
        planes
            .iter()
            .all(|plane| bounding_volume.intersect_plane(plane) != CullingResult::Outside)
    }

    /// Squared distance from the camera to the nearest point of the volume,
    /// or zero if the camera is inside it.
    #[must_use]
    pub fn distance_squared_to(&self, bounding_volume: &BoundingVolume) -> f64 {
        bounding_volume.distance_squared_to(self.position)
    }

    /// The error in screen pixels of rendering geometry with the given
    /// error, in meters, at the given distance from the camera.
    #[must_use]
    pub fn screen_space_error(&self, geometric_error: f64, distance: f64) -> f64 {
        // Avoid dividing by zero when the viewer is inside the tile.
        let distance = distance.max(1e-7);
        (geometric_error * self.viewport_size.y) / (distance * self.sse_denominator)
    }
}
