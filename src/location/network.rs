//! Matched network records and the cluster accuracy estimator.

use serde::{Deserialize, Serialize};

use super::types::LocationError;
use crate::geocalc;

/// A stored WiFi AP or cell tower position, as matched for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub key: String,
    pub lat: f64,
    pub lon: f64,
    /// Historical accuracy radius in meters, if known.
    #[serde(default)]
    pub range: Option<f64>,
}

/// Accuracy radius (meters) for a cluster centred on `(lat, lon)`.
///
/// A single observation contributes its own range. Several observations
/// give the largest distance from the centre to any member. The result is
/// never below `minimum`.
pub fn estimate_accuracy(
    lat: f64,
    lon: f64,
    points: &[Network],
    minimum: f64,
) -> Result<f64, LocationError> {
    let accuracy = match points {
        [] => return Err(LocationError::EmptyCluster),
        [single] => single.range,
        many => {
            let mut max = 0.0_f64;
            for p in many {
                max = max.max(geocalc::distance(lat, lon, p.lat, p.lon)?);
            }
            Some(max)
        }
    };
    Ok(accuracy.map_or(minimum, |a| a.max(minimum)))
}

/// Mean position of a cluster.
pub fn cluster_center(points: &[Network]) -> Result<(f64, f64), LocationError> {
    geocalc::centroid(points.iter().map(|p| (p.lat, p.lon))).ok_or(LocationError::EmptyCluster)
}

/// Split networks into single-linkage clusters: two networks share a
/// cluster when a chain of members each within `max_distance` meters
/// connects them. Clusters keep input order, ordered by first member.
pub fn cluster_networks(
    networks: Vec<Network>,
    max_distance: f64,
) -> Result<Vec<Vec<Network>>, LocationError> {
    let n = networks.len();
    let mut label: Vec<Option<usize>> = vec![None; n];
    let mut next = 0;

    for start in 0..n {
        if label[start].is_some() {
            continue;
        }
        label[start] = Some(next);
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            for j in 0..n {
                if label[j].is_some() {
                    continue;
                }
                let d = geocalc::distance(networks[i].lat, networks[i].lon, networks[j].lat, networks[j].lon)?;
                if d <= max_distance {
                    label[j] = Some(next);
                    stack.push(j);
                }
            }
        }
        next += 1;
    }

    let mut clusters: Vec<Vec<Network>> = vec![Vec::new(); next];
    for (network, l) in networks.into_iter().zip(label) {
        if let Some(l) = l {
            clusters[l].push(network);
        }
    }
    Ok(clusters)
}
