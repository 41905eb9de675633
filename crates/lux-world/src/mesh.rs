//! Per-cell element list and triangulation index buffer.
//!
//! Element `i` owns vertices `[4i, 4i + 4)` and indices `[6i, 6i + 6)`. The
//! six indices are `4i + WINDING[k]`, where the winding table is picked by the
//! element's orientation sign so every face is counter-clockwise when seen
//! from the side it faces.

use bytemuck::{Pod, Zeroable};
use lux_core::constants::{CELL_VOLUME, INDICES_PER_ELEMENT, VERTICES_PER_ELEMENT};
use lux_core::{Element, Orientation};

use crate::error::MeshError;

/// Upper bound on elements per cell: every face of every sub-cell unit.
pub const MAX_ELEMENTS: usize = CELL_VOLUME * 6;

/// Index order for faces pointing along the positive axis.
pub const POSITIVE_WINDING: [u32; INDICES_PER_ELEMENT] = [0, 1, 2, 2, 1, 3];

/// Index order for faces pointing along the negative axis (both triangles flipped).
pub const NEGATIVE_WINDING: [u32; INDICES_PER_ELEMENT] = [0, 2, 1, 1, 2, 3];

/// Quad corners in face-plane (u, v) units, matching vertex order 0..4.
const QUAD: [[u8; 2]; 4] = [[0, 0], [1, 0], [0, 1], [1, 1]];

/// Winding table for an orientation.
#[inline]
pub const fn winding(orientation: Orientation) -> &'static [u32; INDICES_PER_ELEMENT] {
    if orientation.positive {
        &POSITIVE_WINDING
    } else {
        &NEGATIVE_WINDING
    }
}

/// Vertex handed to the renderer: cell-local corner position plus material.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct MeshVertex {
    pub position: [u8; 4],
    pub material: u16,
    pub _pad: u16,
}

/// Elements of one cell and the index buffer triangulating them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellMesh {
    elements: Vec<Element>,
    indices: Vec<u32>,
}

impl CellMesh {
    /// Create an empty mesh.
    pub const fn new() -> Self {
        Self {
            elements: Vec::new(),
            indices: Vec::new(),
        }
    }

    /// Build a mesh from scratch.
    pub fn from_elements(elements: Vec<Element>) -> Result<Self, MeshError> {
        let mut mesh = Self::new();
        mesh.rebuild(elements)?;
        Ok(mesh)
    }

    /// Elements in draw order.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Triangle indices into [`Self::vertices`].
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if the mesh holds no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Number of vertices the index buffer may reference.
    pub fn vertex_count(&self) -> u32 {
        self.elements.len() as u32 * VERTICES_PER_ELEMENT
    }

    /// Replace all content (full load).
    pub fn rebuild(&mut self, elements: Vec<Element>) -> Result<(), MeshError> {
        validate_added(0, &elements)?;

        self.elements.clear();
        self.indices.clear();
        self.indices.reserve(elements.len() * INDICES_PER_ELEMENT);
        for element in elements {
            self.push(element);
        }
        Ok(())
    }

    /// Apply an incremental update.
    ///
    /// `removed` holds element positions in the current list, in any order;
    /// they are removed highest first so earlier removals never shift a
    /// position that is still to be removed. `added` is appended afterwards.
    /// The delta is validated up front and rejected as a whole.
    pub fn apply_delta(&mut self, removed: &[u32], added: &[Element]) -> Result<(), MeshError> {
        let mut order = removed.to_vec();
        order.sort_unstable_by(|a, b| b.cmp(a));
        for pair in order.windows(2) {
            if pair[0] == pair[1] {
                return Err(MeshError::DuplicateRemoval { position: pair[0] });
            }
        }
        if let Some(&highest) = order.first() {
            if highest as usize >= self.elements.len() {
                return Err(MeshError::RemovedOutOfRange {
                    position: highest,
                    len: self.elements.len(),
                });
            }
        }
        validate_added(self.elements.len() - order.len(), added)?;

        for position in order {
            self.remove_at(position as usize);
        }
        for &element in added {
            self.push(element);
        }
        debug_assert!(self.is_consistent());
        Ok(())
    }

    /// Emit the four corner vertices of every element.
    pub fn vertices(&self) -> Vec<MeshVertex> {
        let mut vertices = Vec::with_capacity(self.vertex_count() as usize);
        for element in &self.elements {
            let local = element.local_pos();
            let base = [local.x, local.y, local.z];
            let a = element.orientation.axis.index();
            let (u, v) = ((a + 1) % 3, (a + 2) % 3);
            for corner in QUAD {
                let mut position = [base[0], base[1], base[2], 0];
                position[a] += u8::from(element.orientation.positive);
                position[u] += corner[0];
                position[v] += corner[1];
                vertices.push(MeshVertex {
                    position,
                    material: element.material.0,
                    _pad: 0,
                });
            }
        }
        vertices
    }

    /// Check the index buffer against the element list.
    ///
    /// Holds when the buffer has exactly six entries per element and every
    /// entry references a vertex of the element that owns that block.
    pub fn is_consistent(&self) -> bool {
        if self.indices.len() != self.elements.len() * INDICES_PER_ELEMENT {
            return false;
        }
        self.indices
            .chunks_exact(INDICES_PER_ELEMENT)
            .zip(&self.elements)
            .enumerate()
            .all(|(i, (block, element))| {
                let base = i as u32 * VERTICES_PER_ELEMENT;
                block
                    .iter()
                    .zip(winding(element.orientation))
                    .all(|(&index, &offset)| index == base + offset)
            })
    }

    fn push(&mut self, element: Element) {
        let base = self.vertex_count();
        self.indices
            .extend(winding(element.orientation).iter().map(|&k| base + k));
        self.elements.push(element);
    }

    fn remove_at(&mut self, position: usize) {
        let start = position * INDICES_PER_ELEMENT;
        self.indices.drain(start..start + INDICES_PER_ELEMENT);
        self.elements.remove(position);

        let removed_base = position as u32 * VERTICES_PER_ELEMENT;
        for index in &mut self.indices {
            if *index >= removed_base {
                *index -= VERTICES_PER_ELEMENT;
            }
        }
    }
}

fn validate_added(kept: usize, added: &[Element]) -> Result<(), MeshError> {
    let count = kept + added.len();
    if count > MAX_ELEMENTS {
        return Err(MeshError::TooManyElements {
            count,
            max: MAX_ELEMENTS,
        });
    }
    added.iter().try_for_each(Element::validate)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lux_core::{Axis, MaterialId};

    fn element(local_index: u16, axis: Axis, positive: bool) -> Element {
        Element::new(
            local_index,
            Orientation::new(axis, positive),
            MaterialId::STONE,
        )
    }

    fn sample() -> Vec<Element> {
        vec![
            element(0, Axis::X, true),
            element(1, Axis::Y, false),
            element(2, Axis::Z, true),
        ]
    }

    #[test]
    fn full_load_builds_winding_blocks() {
        let mesh = CellMesh::from_elements(sample()).unwrap();
        assert_eq!(mesh.len(), 3);
        assert_eq!(mesh.indices().len(), 18);
        assert_eq!(&mesh.indices()[0..6], &[0, 1, 2, 2, 1, 3]);
        assert_eq!(&mesh.indices()[6..12], &[4, 6, 5, 5, 6, 7]);
        assert_eq!(&mesh.indices()[12..18], &[8, 9, 10, 10, 9, 11]);
        assert!(mesh.is_consistent());
    }

    #[test]
    fn delta_removes_then_appends() {
        let mut mesh = CellMesh::from_elements(sample()).unwrap();
        let new = element(7, Axis::Y, true);
        mesh.apply_delta(&[1], &[new]).unwrap();

        let initial = sample();
        assert_eq!(mesh.elements(), &[initial[0], initial[2], new]);
        assert_eq!(mesh.indices().len(), 3 * INDICES_PER_ELEMENT);
        assert!(mesh.indices().iter().all(|&i| i < mesh.vertex_count()));
        assert!(mesh.is_consistent());
    }

    #[test]
    fn delta_matches_fresh_load() {
        let initial: Vec<Element> = (0..10)
            .map(|i| element(i, Axis::ALL[i as usize % 3], i % 2 == 0))
            .collect();
        let mut mesh = CellMesh::from_elements(initial.clone()).unwrap();

        // Ascending input order must still remove the right elements.
        mesh.apply_delta(&[0, 4, 9], &[element(100, Axis::Z, false)])
            .unwrap();
        mesh.apply_delta(&[6], &[element(101, Axis::X, true), element(102, Axis::Y, true)])
            .unwrap();
        mesh.apply_delta(&[], &[]).unwrap();

        let mut expected: Vec<Element> = initial
            .iter()
            .enumerate()
            .filter(|(i, _)| ![0, 4, 9].contains(i))
            .map(|(_, e)| *e)
            .collect();
        expected.push(element(100, Axis::Z, false));
        expected.remove(6);
        expected.push(element(101, Axis::X, true));
        expected.push(element(102, Axis::Y, true));

        assert_eq!(mesh, CellMesh::from_elements(expected).unwrap());
    }

    #[test]
    fn removing_everything_leaves_empty_mesh() {
        let mut mesh = CellMesh::from_elements(sample()).unwrap();
        mesh.apply_delta(&[2, 0, 1], &[]).unwrap();
        assert!(mesh.is_empty());
        assert!(mesh.indices().is_empty());
    }

    #[test]
    fn invalid_delta_leaves_mesh_untouched() {
        let mut mesh = CellMesh::from_elements(sample()).unwrap();
        let before = mesh.clone();

        assert!(matches!(
            mesh.apply_delta(&[3], &[]),
            Err(MeshError::RemovedOutOfRange { position: 3, len: 3 })
        ));
        assert!(matches!(
            mesh.apply_delta(&[1, 1], &[]),
            Err(MeshError::DuplicateRemoval { position: 1 })
        ));
        let bad = Element::new(0, Orientation::new(Axis::X, true), MaterialId::NONE);
        assert!(matches!(
            mesh.apply_delta(&[0], &[bad]),
            Err(MeshError::InvalidElement(_))
        ));
        assert_eq!(mesh, before);
    }

    #[test]
    fn rebuild_rejects_invalid_elements() {
        let bad = element(CELL_VOLUME as u16, Axis::X, true);
        assert!(CellMesh::from_elements(vec![bad]).is_err());
    }

    #[test]
    fn vertices_lie_on_the_face_plane() {
        let up = element(0, Axis::Y, true);
        let mesh = CellMesh::from_elements(vec![up]).unwrap();
        let vertices = mesh.vertices();
        assert_eq!(vertices.len(), 4);
        assert!(vertices.iter().all(|v| v.position[1] == 1));
        assert_eq!(vertices[0].position, [0, 1, 0, 0]);
        assert_eq!(vertices[3].position, [1, 1, 1, 0]);
        assert!(vertices.iter().all(|v| v.material == MaterialId::STONE.0));
        assert_eq!(bytemuck::cast_slice::<MeshVertex, u8>(&vertices).len(), 32);
    }
}
