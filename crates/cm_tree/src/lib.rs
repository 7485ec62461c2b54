#![forbid(unsafe_code)]

use std::sync::OnceLock;

use cm_core::{is_finite_non_negative, is_finite_positive, CompartmentId};
use thiserror::Error;
use tracing::debug;

/// Passive parameters of one compartment. Units follow nF, uS, mV.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompartmentParams {
    pub c_m: f64,
    pub g_c: f64,
    pub g_l: f64,
    pub e_l: f64,
}

impl CompartmentParams {
    pub fn new(c_m: f64, g_c: f64, g_l: f64, e_l: f64) -> Self {
        Self { c_m, g_c, g_l, e_l }
    }

    fn validate(&self) -> Result<(), TreeError> {
        if !is_finite_positive(self.c_m) {
            return Err(TreeError::InvalidParameter {
                name: "C_m",
                value: self.c_m,
            });
        }
        if !is_finite_non_negative(self.g_l) {
            return Err(TreeError::InvalidParameter {
                name: "g_L",
                value: self.g_l,
            });
        }
        if !is_finite_non_negative(self.g_c) {
            return Err(TreeError::InvalidParameter {
                name: "g_c",
                value: self.g_c,
            });
        }
        if !self.e_l.is_finite() {
            return Err(TreeError::InvalidParameter {
                name: "e_L",
                value: self.e_l,
            });
        }
        Ok(())
    }
}

impl Default for CompartmentParams {
    fn default() -> Self {
        Self {
            c_m: 1.0,
            g_c: 0.01,
            g_l: 0.1,
            e_l: -70.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Compartment {
    pub id: CompartmentId,
    pub parent: Option<CompartmentId>,
    pub children: Vec<CompartmentId>,
    pub depth: u32,
    pub params: CompartmentParams,
}

impl Compartment {
    /// Coupling conductance towards the parent; zero for the root.
    pub fn coupling(&self) -> f64 {
        match self.parent {
            Some(_) => self.params.g_c,
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbors<'a> {
    pub parent: Option<CompartmentId>,
    pub children: &'a [CompartmentId],
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TreeError {
    #[error("parent compartment {0:?} does not exist in this tree")]
    InvalidParent(CompartmentId),
    #[error("tree already has root compartment {existing:?}")]
    MultipleRoots { existing: CompartmentId },
    #[error("invalid compartment parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("compartment {0:?} does not exist in this tree")]
    InvalidCompartment(CompartmentId),
}

/// Arena of compartments addressed by index. Parents always precede their
/// children, so the structure is a single rooted tree without cycles.
#[derive(Debug, Clone, Default)]
pub struct CompartmentTree {
    compartments: Vec<Compartment>,
    /// Built on first use after the last insertion.
    elimination_order: OnceLock<Vec<CompartmentId>>,
}

impl CompartmentTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_compartment(
        &mut self,
        parent: Option<CompartmentId>,
        params: CompartmentParams,
    ) -> Result<CompartmentId, TreeError> {
        params.validate()?;
        let depth = match parent {
            Some(parent_id) => {
                let parent = self
                    .get(parent_id)
                    .ok_or(TreeError::InvalidParent(parent_id))?;
                parent.depth.saturating_add(1)
            }
            None => {
                if let Some(existing) = self.root() {
                    return Err(TreeError::MultipleRoots { existing });
                }
                0
            }
        };

        let id = CompartmentId(self.compartments.len() as u32);
        if let Some(parent_id) = parent {
            self.compartments[parent_id.index()].children.push(id);
        }
        self.compartments.push(Compartment {
            id,
            parent,
            children: Vec::new(),
            depth,
            params,
        });
        self.elimination_order.take();
        debug!(
            compartment = id.0,
            parent = ?parent.map(|p| p.0),
            depth,
            c_m = params.c_m,
            g_c = params.g_c,
            g_l = params.g_l,
            e_l = params.e_l,
            "compartment added"
        );
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.compartments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compartments.is_empty()
    }

    pub fn root(&self) -> Option<CompartmentId> {
        self.compartments.first().map(|compartment| compartment.id)
    }

    pub fn get(&self, id: CompartmentId) -> Option<&Compartment> {
        self.compartments.get(id.index())
    }

    pub fn compartment(&self, id: CompartmentId) -> Result<&Compartment, TreeError> {
        self.get(id).ok_or(TreeError::InvalidCompartment(id))
    }

    pub fn contains(&self, id: CompartmentId) -> bool {
        id.index() < self.compartments.len()
    }

    pub fn compartments(&self) -> impl Iterator<Item = &Compartment> {
        self.compartments.iter()
    }

    pub fn params(&self, id: CompartmentId) -> Result<CompartmentParams, TreeError> {
        self.compartment(id).map(|compartment| compartment.params)
    }

    pub fn neighbors(&self, id: CompartmentId) -> Result<Neighbors<'_>, TreeError> {
        let compartment = self.compartment(id)?;
        Ok(Neighbors {
            parent: compartment.parent,
            children: &compartment.children,
        })
    }

    pub fn depth(&self, id: CompartmentId) -> Result<u32, TreeError> {
        self.compartment(id).map(|compartment| compartment.depth)
    }

    pub fn max_depth(&self) -> u32 {
        self.compartments
            .iter()
            .map(|compartment| compartment.depth)
            .max()
            .unwrap_or(0)
    }

    pub fn leaves(&self) -> impl Iterator<Item = CompartmentId> + '_ {
        self.compartments
            .iter()
            .filter(|compartment| compartment.children.is_empty())
            .map(|compartment| compartment.id)
    }

    /// Post-order from the root: every child appears before its parent.
    pub fn elimination_order(&self) -> &[CompartmentId] {
        self.elimination_order.get_or_init(|| self.post_order())
    }

    /// Reverse post-order: every parent appears before its children.
    pub fn substitution_order(&self) -> impl Iterator<Item = CompartmentId> + '_ {
        self.elimination_order().iter().rev().copied()
    }

    pub fn leak_reversals(&self) -> Vec<f64> {
        self.compartments
            .iter()
            .map(|compartment| compartment.params.e_l)
            .collect()
    }

    fn post_order(&self) -> Vec<CompartmentId> {
        let mut order = Vec::with_capacity(self.compartments.len());
        let Some(root) = self.root() else {
            return order;
        };
        let mut stack = vec![(root, 0usize)];
        while let Some((id, next_child)) = stack.pop() {
            let children = &self.compartments[id.index()].children;
            match children.get(next_child) {
                Some(&child) => {
                    stack.push((id, next_child + 1));
                    stack.push((child, 0));
                }
                None => order.push(id),
            }
        }
        debug_assert_eq!(order.len(), self.compartments.len());
        order
    }
}
