//! Detection markers and their reconciliation into a [`SceneContext`].

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use anyhow::anyhow;
use image::Rgba;
use nalgebra::{Point3, Vector3};

use super::arena::{NodeId, NodeKind, SceneContext, SceneNode};
use crate::detect::DetectionRecord;
use crate::label::LabelTexture;

/// Stable identity of one detection across updates.
///
/// Two records with the same class, geometry and confidence share an
/// identity; the ordinal tells exact duplicates apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayKey {
    identity: u64,
    ordinal: u32,
}

impl OverlayKey {
    pub fn identity_of(record: &DetectionRecord) -> u64 {
        let mut hasher = DefaultHasher::new();
        record.class_label.hash(&mut hasher);
        for value in [
            record.center_x,
            record.center_y,
            record.width,
            record.height,
            record.confidence,
        ] {
            value.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }
}

/// How overlays follow a detection update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SceneSync {
    /// Keep overlays whose detection is still present; add and remove the rest.
    #[default]
    Keyed,
    /// Tear down every overlay and rebuild from scratch each tick.
    Rebuild,
}

impl FromStr for SceneSync {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyed" => Ok(Self::Keyed),
            "rebuild" => Ok(Self::Rebuild),
            other => Err(anyhow!("unknown scene sync '{}'", other)),
        }
    }
}

impl fmt::Display for SceneSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyed => write!(f, "keyed"),
            Self::Rebuild => write!(f, "rebuild"),
        }
    }
}

/// Maps pixel-space detections onto the background plane.
///
/// Pixel `(0, 0)` is the top-left of the plane; scene Y points up.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelToScene {
    image_width: f32,
    image_height: f32,
    plane_width: f32,
    plane_height: f32,
}

impl PixelToScene {
    pub fn new(image: (u32, u32), plane: (f32, f32)) -> Option<Self> {
        if image.0 == 0 || image.1 == 0 || !(plane.0 > 0.0) || !(plane.1 > 0.0) {
            return None;
        }
        Some(Self {
            image_width: image.0 as f32,
            image_height: image.1 as f32,
            plane_width: plane.0,
            plane_height: plane.1,
        })
    }

    pub fn point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x / self.image_width - 0.5) * self.plane_width,
            (0.5 - y / self.image_height) * self.plane_height,
        )
    }

    pub fn extent(&self, width: f32, height: f32) -> (f32, f32) {
        (
            width / self.image_width * self.plane_width,
            height / self.image_height * self.plane_height,
        )
    }
}

/// Placement of one target-class detection in scene units.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerSpec {
    pub key: OverlayKey,
    pub center: Point3<f32>,
    pub size: Vector3<f32>,
    pub label_position: Point3<f32>,
    pub label_text: String,
}

/// Geometry parameters for markers.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerLayout {
    pub target_class: String,
    pub marker_depth: f32,
    pub label_offset: f32,
    pub label_plane: (f32, f32),
    pub marker_color: Rgba<u8>,
    /// When set, records are in image pixels and get mapped onto the plane.
    pub pixel_mapping: Option<PixelToScene>,
}

impl MarkerLayout {
    /// Markers for every target-class record, in input order.
    pub fn place(&self, records: &[DetectionRecord]) -> Vec<MarkerSpec> {
        let mut seen: HashMap<u64, u32> = HashMap::new();
        records
            .iter()
            .filter(|record| record.is_class(&self.target_class))
            .map(|record| {
                let identity = OverlayKey::identity_of(record);
                let ordinal = seen.entry(identity).or_insert(0);
                let key = OverlayKey {
                    identity,
                    ordinal: *ordinal,
                };
                *ordinal += 1;

                let ((x, y), (w, h)) = match &self.pixel_mapping {
                    Some(mapping) => (
                        mapping.point(record.center_x, record.center_y),
                        mapping.extent(record.width, record.height),
                    ),
                    None => (
                        (record.center_x, record.center_y),
                        (record.width, record.height),
                    ),
                };
                MarkerSpec {
                    key,
                    center: Point3::new(x, y, 0.0),
                    size: Vector3::new(w, h, self.marker_depth),
                    label_position: Point3::new(x, y + h / 2.0 + self.label_offset, 0.0),
                    label_text: record.confidence_label(),
                }
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
    pub reused: usize,
}

#[derive(Clone, Copy, Debug)]
struct OverlayNodes {
    marker: NodeId,
    label: NodeId,
}

/// Overlay nodes currently in the scene, by detection key.
#[derive(Debug, Default)]
pub struct SceneOverlays {
    nodes: HashMap<OverlayKey, OverlayNodes>,
}

impl SceneOverlays {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &OverlayKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Bring the scene in line with `markers`.
    ///
    /// `make_label` is only called for markers that need new nodes.
    pub fn reconcile<F>(
        &mut self,
        scene: &mut SceneContext,
        markers: &[MarkerSpec],
        layout: &MarkerLayout,
        sync: SceneSync,
        mut make_label: F,
    ) -> SyncReport
    where
        F: FnMut(&MarkerSpec) -> LabelTexture,
    {
        let mut report = SyncReport::default();
        match sync {
            SceneSync::Rebuild => {
                report.removed = self.clear(scene);
            }
            SceneSync::Keyed => {
                let wanted: HashSet<OverlayKey> = markers.iter().map(|m| m.key).collect();
                let stale: Vec<OverlayKey> = self
                    .nodes
                    .keys()
                    .filter(|key| !wanted.contains(key))
                    .copied()
                    .collect();
                for key in stale {
                    if let Some(nodes) = self.nodes.remove(&key) {
                        remove_nodes(scene, nodes);
                        report.removed += 1;
                    }
                }
            }
        }

        for marker in markers {
            if self.nodes.contains_key(&marker.key) {
                report.reused += 1;
                continue;
            }
            let marker_node = scene.insert(SceneNode {
                kind: NodeKind::WireBox {
                    size: marker.size,
                    color: layout.marker_color,
                },
                position: marker.center,
            });
            let label_node = scene.insert(SceneNode {
                kind: NodeKind::LabelPlane {
                    width: layout.label_plane.0,
                    height: layout.label_plane.1,
                    texture: make_label(marker),
                },
                position: marker.label_position,
            });
            self.nodes.insert(
                marker.key,
                OverlayNodes {
                    marker: marker_node,
                    label: label_node,
                },
            );
            report.added += 1;
        }
        report
    }

    /// Remove every overlay. Returns how many were removed.
    pub fn clear(&mut self, scene: &mut SceneContext) -> usize {
        let count = self.nodes.len();
        for (_, nodes) in self.nodes.drain() {
            remove_nodes(scene, nodes);
        }
        count
    }
}

fn remove_nodes(scene: &mut SceneContext, nodes: OverlayNodes) {
    if scene.remove(nodes.marker).is_none() {
        log::debug!("overlay marker node already gone");
    }
    if scene.remove(nodes.label).is_none() {
        log::debug!("overlay label node already gone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(class: &str, x: f32, conf: f32) -> DetectionRecord {
        DetectionRecord::new(class, x, 0.0, 2.0, 1.0, conf).unwrap()
    }

    fn layout() -> MarkerLayout {
        MarkerLayout {
            target_class: "missing".to_string(),
            marker_depth: 1.0,
            label_offset: 1.0,
            label_plane: (2.0, 1.0),
            marker_color: Rgba([238, 130, 238, 255]),
            pixel_mapping: None,
        }
    }

    #[test]
    fn markers_follow_record_geometry() {
        let record = DetectionRecord::new("missing", 3.0, 2.0, 4.0, 2.0, 0.5).unwrap();
        let markers = layout().place(&[record]);
        assert_eq!(markers.len(), 1);
        let marker = &markers[0];
        assert_eq!(marker.center, Point3::new(3.0, 2.0, 0.0));
        assert_eq!(marker.size, Vector3::new(4.0, 2.0, 1.0));
        assert_eq!(marker.label_position, Point3::new(3.0, 4.0, 0.0));
        assert_eq!(marker.label_text, "50%");
    }

    #[test]
    fn duplicates_get_distinct_ordinals() {
        let r = record("missing", 1.0, 0.9);
        let markers = layout().place(&[r.clone(), r.clone(), record("other", 1.0, 0.9)]);
        assert_eq!(markers.len(), 2);
        assert_ne!(markers[0].key, markers[1].key);
        assert_eq!(markers[0].key.ordinal(), 0);
        assert_eq!(markers[1].key.ordinal(), 1);
    }

    #[test]
    fn pixel_mapping_centers_on_plane() {
        let mapping = PixelToScene::new((200, 100), (16.0, 9.0)).unwrap();
        assert_eq!(mapping.point(100.0, 50.0), (0.0, 0.0));
        assert_eq!(mapping.point(0.0, 0.0), (-8.0, 4.5));
        assert_eq!(mapping.extent(50.0, 50.0), (4.0, 4.5));
        assert!(PixelToScene::new((0, 100), (16.0, 9.0)).is_none());
    }

    #[test]
    fn keyed_sync_reuses_surviving_overlays() {
        let layout = layout();
        let mut scene = SceneContext::new(16.0, 9.0);
        let mut overlays = SceneOverlays::new();
        let a = record("missing", 1.0, 0.9);
        let b = record("missing", 5.0, 0.8);
        let c = record("missing", 9.0, 0.7);

        let first = layout.place(&[a.clone(), b.clone()]);
        let report = overlays.reconcile(&mut scene, &first, &layout, SceneSync::Keyed, |_| {
            LabelTexture::blank()
        });
        assert_eq!(report, SyncReport { added: 2, removed: 0, reused: 0 });
        assert_eq!(scene.overlay_count(), 4);

        let mut labels_made = 0;
        let second = layout.place(&[b, c]);
        let report = overlays.reconcile(&mut scene, &second, &layout, SceneSync::Keyed, |_| {
            labels_made += 1;
            LabelTexture::blank()
        });
        assert_eq!(report, SyncReport { added: 1, removed: 1, reused: 1 });
        assert_eq!(labels_made, 1);
        assert_eq!(scene.overlay_count(), 4);
    }

    #[test]
    fn rebuild_sync_recreates_everything() {
        let layout = layout();
        let mut scene = SceneContext::new(16.0, 9.0);
        let mut overlays = SceneOverlays::new();
        let markers = layout.place(&[record("missing", 1.0, 0.9)]);
        overlays.reconcile(&mut scene, &markers, &layout, SceneSync::Rebuild, |_| {
            LabelTexture::blank()
        });
        let report = overlays.reconcile(&mut scene, &markers, &layout, SceneSync::Rebuild, |_| {
            LabelTexture::blank()
        });
        assert_eq!(report, SyncReport { added: 1, removed: 1, reused: 0 });
        assert_eq!(scene.overlay_count(), 2);
    }

    #[test]
    fn empty_update_clears_overlays_but_not_background() {
        let layout = layout();
        let mut scene = SceneContext::new(16.0, 9.0);
        let mut overlays = SceneOverlays::new();
        let markers = layout.place(&[record("missing", 1.0, 0.9)]);
        overlays.reconcile(&mut scene, &markers, &layout, SceneSync::Keyed, |_| {
            LabelTexture::blank()
        });
        let report = overlays.reconcile(&mut scene, &[], &layout, SceneSync::Keyed, |_| {
            LabelTexture::blank()
        });
        assert_eq!(report.removed, 1);
        assert_eq!(scene.len(), 1);
        assert!(scene.contains(scene.background()));
    }

    #[test]
    fn sync_parses_from_strings() {
        assert_eq!("Keyed".parse::<SceneSync>().unwrap(), SceneSync::Keyed);
        assert_eq!("rebuild".parse::<SceneSync>().unwrap(), SceneSync::Rebuild);
        assert!("diff".parse::<SceneSync>().is_err());
    }
}
