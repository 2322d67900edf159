use image::Rgba;
use nalgebra::{Point3, Vector3};

use crate::label::LabelTexture;

/// Handle to a node in a [`SceneContext`].
///
/// Ids carry the slot generation, so a handle kept past its node's removal
/// never resolves to whatever reuses the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// Camera-facing plane textured with the latest video frame.
    Background { width: f32, height: f32 },
    /// Wireframe box, edges only.
    WireBox { size: Vector3<f32>, color: Rgba<u8> },
    /// Camera-facing plane showing a rendered label.
    LabelPlane {
        width: f32,
        height: f32,
        texture: LabelTexture,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SceneNode {
    pub kind: NodeKind,
    pub position: Point3<f32>,
}

struct Slot {
    generation: u32,
    node: Option<SceneNode>,
}

/// Node arena for one AR view.
///
/// The background plane is inserted on construction and can never be removed.
pub struct SceneContext {
    slots: Vec<Slot>,
    free: Vec<u32>,
    background: NodeId,
    len: usize,
}

impl SceneContext {
    pub fn new(background_width: f32, background_height: f32) -> Self {
        let mut scene = Self {
            slots: Vec::new(),
            free: Vec::new(),
            background: NodeId {
                index: 0,
                generation: 0,
            },
            len: 0,
        };
        scene.background = scene.insert(SceneNode {
            kind: NodeKind::Background {
                width: background_width,
                height: background_height,
            },
            position: Point3::origin(),
        });
        scene
    }

    pub fn background(&self) -> NodeId {
        self.background
    }

    pub fn insert(&mut self, node: SceneNode) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Remove a node. Stale ids and the background return `None`.
    pub fn remove(&mut self, id: NodeId) -> Option<SceneNode> {
        if id == self.background {
            return None;
        }
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(node)
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Live nodes, background included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live nodes other than the background.
    pub fn overlay_count(&self) -> usize {
        self.len.saturating_sub(1)
    }

    /// Live nodes in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SceneNode)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|node| {
                (
                    NodeId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    node,
                )
            })
        })
    }
}
