//! Drive-pair raycast intersection
//!
//! Two drives form a candidate intersection when their raycasts meet
//! within the configured raycast-width tolerance. The triangle spanned
//! by the two emitter origins and the candidate node is solved with the
//! law of sines; degenerate (collinear) pairs fall back to the midpoint
//! of the two ray endpoints.

use crate::drive::Drive;
use crate::foundation::math::{constants, utils, Vec3};

/// Angle sum below this counts as collinear
const COLLINEAR_EPS: f32 = 1e-4;

/// Candidate intersection of a drive pair
#[derive(Debug, Clone, Copy)]
pub struct PairNode {
    /// Accepted intersection point in construct-local space
    pub node: Vec3,
}

/// Compute the intersection node of a drive pair, if the pair's
/// raycasts meet within `tolerance` meters.
pub fn intersect_pair(a: &Drive, b: &Drive, tolerance: f32) -> Option<PairNode> {
    let baseline = b.local_origin - a.local_origin;
    let baseline_len = baseline.magnitude();
    if baseline_len <= f32::EPSILON {
        return None;
    }

    // Interior angles at each emitter between its ray and the baseline
    let alpha = utils::angle_between(&a.direction, &baseline);
    let beta = utils::angle_between(&b.direction, &(-baseline));
    let combined = alpha + beta;

    if combined <= COLLINEAR_EPS {
        // Collinear/degenerate: the rays run along the baseline toward
        // each other. Use the midpoint of the two ray endpoints.
        let midpoint = (a.ray_endpoint() + b.ray_endpoint()) * 0.5;
        let close_enough = a.local_ray().distance_to_point(midpoint) <= tolerance
            && b.local_ray().distance_to_point(midpoint) <= tolerance;
        return close_enough.then_some(PairNode { node: midpoint });
    }

    if combined >= constants::PI - COLLINEAR_EPS {
        // Parallel or diverging rays never meet
        return None;
    }

    // Sine rule on the triangle (a.origin, b.origin, node): the side
    // from each emitter is opposite the other emitter's angle
    let gamma = constants::PI - combined;
    let sin_gamma = gamma.sin();
    if sin_gamma <= f32::EPSILON {
        return None;
    }
    let len_a = baseline_len * beta.sin() / sin_gamma;
    let len_b = baseline_len * alpha.sin() / sin_gamma;

    if len_a > a.max_ray_distance || len_b > b.max_ray_distance {
        return None;
    }

    let pa = a.local_origin + a.direction * len_a;
    let pb = b.local_origin + b.direction * len_b;
    let midpoint = (pa + pb) * 0.5;
    let close_enough =
        (pa - midpoint).magnitude() <= tolerance && (pb - midpoint).magnitude() <= tolerance;
    close_enough.then_some(PairNode { node: midpoint })
}
