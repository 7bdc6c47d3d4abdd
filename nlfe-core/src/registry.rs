//! Type-tag registry.
//!
//! Maps the type tags written to restart streams back to constructors.
//! [`Registry::default`] knows every built-in type; callers add their own
//! with the `register_*` methods before loading a dump.

use std::collections::BTreeMap;
use std::fmt;

use crate::constraint::{DistanceConstraint, NonlinearConstraint};
use crate::contact::{ContactInterface, NodeToNodeContact};
use crate::domain::{BiphasicDomain, Domain, ElasticSolidDomain};
use crate::error::{Error, Result};
use crate::material::{LinearElastic, Material, NeoHookean, PoroElastic};

type MaterialCtor = Box<dyn Fn(&str, &[(String, f64)]) -> Result<Box<dyn Material>> + Send + Sync>;
type DomainCtor = Box<dyn Fn(&[u8]) -> Result<Box<dyn Domain>> + Send + Sync>;
type ContactCtor = Box<dyn Fn(&[u8]) -> Result<Box<dyn ContactInterface>> + Send + Sync>;
type ConstraintCtor = Box<dyn Fn(&[u8]) -> Result<Box<dyn NonlinearConstraint>> + Send + Sync>;

pub struct Registry {
    materials: BTreeMap<String, MaterialCtor>,
    domains: BTreeMap<String, DomainCtor>,
    contacts: BTreeMap<String, ContactCtor>,
    constraints: BTreeMap<String, ConstraintCtor>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("materials", &self.materials.keys().collect::<Vec<_>>())
            .field("domains", &self.domains.keys().collect::<Vec<_>>())
            .field("contacts", &self.contacts.keys().collect::<Vec<_>>())
            .field("constraints", &self.constraints.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut r = Self::empty();
        r.register_material(LinearElastic::TAG, |name, p| {
            Ok(Box::new(LinearElastic::from_parameters(name, p)?))
        });
        r.register_material(NeoHookean::TAG, |name, p| {
            Ok(Box::new(NeoHookean::from_parameters(name, p)?))
        });
        r.register_material(PoroElastic::TAG, |name, p| {
            Ok(Box::new(PoroElastic::from_parameters(name, p)?))
        });
        r.register_domain(ElasticSolidDomain::TAG, |b| Ok(Box::new(ElasticSolidDomain::restore(b)?)));
        r.register_domain(BiphasicDomain::TAG, |b| Ok(Box::new(BiphasicDomain::restore(b)?)));
        r.register_contact(NodeToNodeContact::TAG, |b| {
            Ok(Box::new(bincode::deserialize::<NodeToNodeContact>(b)?))
        });
        r.register_constraint(DistanceConstraint::TAG, |b| {
            Ok(Box::new(bincode::deserialize::<DistanceConstraint>(b)?))
        });
        r
    }
}

impl Registry {
    /// Registry without any built-in type.
    pub fn empty() -> Self {
        Self {
            materials: BTreeMap::new(),
            domains: BTreeMap::new(),
            contacts: BTreeMap::new(),
            constraints: BTreeMap::new(),
        }
    }

    pub fn register_material<F>(&mut self, tag: &str, f: F)
    where
        F: Fn(&str, &[(String, f64)]) -> Result<Box<dyn Material>> + Send + Sync + 'static,
    {
        self.materials.insert(tag.to_string(), Box::new(f));
    }

    pub fn register_domain<F>(&mut self, tag: &str, f: F)
    where
        F: Fn(&[u8]) -> Result<Box<dyn Domain>> + Send + Sync + 'static,
    {
        self.domains.insert(tag.to_string(), Box::new(f));
    }

    pub fn register_contact<F>(&mut self, tag: &str, f: F)
    where
        F: Fn(&[u8]) -> Result<Box<dyn ContactInterface>> + Send + Sync + 'static,
    {
        self.contacts.insert(tag.to_string(), Box::new(f));
    }

    pub fn register_constraint<F>(&mut self, tag: &str, f: F)
    where
        F: Fn(&[u8]) -> Result<Box<dyn NonlinearConstraint>> + Send + Sync + 'static,
    {
        self.constraints.insert(tag.to_string(), Box::new(f));
    }

    pub fn material_tags(&self) -> impl Iterator<Item = &str> {
        self.materials.keys().map(String::as_str)
    }

    pub fn domain_tags(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    pub fn create_material(&self, tag: &str, name: &str, params: &[(String, f64)]) -> Result<Box<dyn Material>> {
        let ctor = self.materials.get(tag).ok_or_else(|| Error::UnknownType {
            kind: "material",
            tag: tag.to_string(),
        })?;
        ctor(name, params)
    }

    pub fn create_domain(&self, tag: &str, bytes: &[u8]) -> Result<Box<dyn Domain>> {
        let ctor = self.domains.get(tag).ok_or_else(|| Error::UnknownType {
            kind: "domain",
            tag: tag.to_string(),
        })?;
        ctor(bytes)
    }

    pub fn create_contact(&self, tag: &str, bytes: &[u8]) -> Result<Box<dyn ContactInterface>> {
        let ctor = self.contacts.get(tag).ok_or_else(|| Error::UnknownType {
            kind: "contact interface",
            tag: tag.to_string(),
        })?;
        ctor(bytes)
    }

    pub fn create_constraint(&self, tag: &str, bytes: &[u8]) -> Result<Box<dyn NonlinearConstraint>> {
        let ctor = self.constraints.get(tag).ok_or_else(|| Error::UnknownType {
            kind: "nonlinear constraint",
            tag: tag.to_string(),
        })?;
        ctor(bytes)
    }
}
