//! Restart streams.
//!
//! A stream starts with a magic number, a format version and the
//! [`DumpMode`], followed by named sections. Every section begins with its
//! name so a reader detects truncated or reordered streams; every
//! polymorphic item is written as its type tag followed by an opaque
//! payload and rebuilt through the [`Registry`] on load.
//!
//! Full dumps carry the whole model. Shallow dumps carry the state that
//! changes while iterating (time, nodal values, material points, contact
//! and constraint multipliers) and restore into a model with identical
//! topology.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::boundary::{FixedBc, InitialCondition, PrescribedBc};
use crate::dof::EquationScheme;
use crate::error::{Error, Result};
use crate::load::{BodyLoad, EdgeLoad, GlobalData, LoadController, ModelLoad, NodalLoad, SurfaceLoad};
use crate::mesh::Mesh;
use crate::problem::{AnalysisKind, Problem};
use crate::registry::Registry;
use crate::types::TimeInfo;

const MAGIC: [u8; 4] = *b"NLFE";
const VERSION: u32 = 1;

/// What a dump contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DumpMode {
    Full,
    Shallow,
}

pub struct DumpWriter<W: Write> {
    inner: W,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(mut inner: W, mode: DumpMode) -> Result<Self> {
        inner.write_all(&MAGIC)?;
        bincode::serialize_into(&mut inner, &(VERSION, mode))?;
        Ok(Self { inner })
    }

    pub fn section(&mut self, name: &str) -> Result<()> {
        self.write(name)
    }

    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        bincode::serialize_into(&mut self.inner, value)?;
        Ok(())
    }

    pub fn write_len(&mut self, n: usize) -> Result<()> {
        self.write(&(n as u64))
    }

    /// Items of one type, each prefixed with `tag`.
    pub fn write_tagged<T: Serialize>(&mut self, tag: &str, items: &[T]) -> Result<()> {
        self.write_len(items.len())?;
        for item in items {
            self.write(tag)?;
            self.write(&bincode::serialize(item)?)?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

pub struct DumpReader<R: Read> {
    inner: R,
    mode: DumpMode,
}

impl<R: Read> DumpReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        inner.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::Serialization("not a restart stream".into()));
        }
        let (version, mode): (u32, DumpMode) = bincode::deserialize_from(&mut inner)?;
        if version != VERSION {
            return Err(Error::Serialization(format!(
                "restart stream version {} (expected {})",
                version, VERSION
            )));
        }
        Ok(Self { inner, mode })
    }

    pub fn mode(&self) -> DumpMode {
        self.mode
    }

    pub fn expect_section(&mut self, name: &str) -> Result<()> {
        let found: String = self.read()?;
        if found != name {
            return Err(Error::Serialization(format!(
                "expected section \"{}\", found \"{}\"",
                name, found
            )));
        }
        Ok(())
    }

    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(bincode::deserialize_from(&mut self.inner)?)
    }

    pub fn read_len(&mut self) -> Result<usize> {
        let n: u64 = self.read()?;
        Ok(n as usize)
    }

    /// (tag, payload)
    pub fn read_item(&mut self) -> Result<(String, Vec<u8>)> {
        Ok((self.read()?, self.read()?))
    }

    pub fn read_tagged<T: DeserializeOwned>(&mut self, tag: &str) -> Result<Vec<T>> {
        let n = self.read_len()?;
        (0..n)
            .map(|_| {
                let (found, payload) = self.read_item()?;
                check_tag(tag, &found)?;
                Ok(bincode::deserialize(&payload)?)
            })
            .collect()
    }
}

fn check_tag(expected: &str, found: &str) -> Result<()> {
    if expected != found {
        return Err(Error::Serialization(format!(
            "expected \"{}\" item, found \"{}\"",
            expected, found
        )));
    }
    Ok(())
}

fn check_count(what: &str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(Error::Serialization(format!(
            "{} {} in stream, model has {}",
            found, what, expected
        )));
    }
    Ok(())
}

const LINEAR_CONSTRAINTS: &str = "linear constraints";

/// Everything but the analysis steps.
pub(crate) fn write_problem<W: Write>(w: &mut DumpWriter<W>, p: &Problem) -> Result<()> {
    w.section("dofs")?;
    w.write(&p.registry)?;

    w.section("controllers")?;
    w.write_len(p.controllers.len())?;
    for c in &p.controllers {
        w.write(c.type_tag())?;
        w.write(&bincode::serialize(c)?)?;
    }

    w.section("globals")?;
    w.write(&p.constants)?;
    w.write_len(p.global_data.len())?;
    for g in &p.global_data {
        w.write(&g.type_tag)?;
        w.write(&bincode::serialize(g)?)?;
    }

    w.section("materials")?;
    w.write_len(p.materials.len())?;
    for m in &p.materials {
        w.write(m.type_tag())?;
        w.write(m.name())?;
        w.write(&m.parameters())?;
    }

    w.section("mesh")?;
    w.write(&p.mesh)?;
    w.write_len(p.domains.len())?;
    for d in &p.domains {
        w.write(d.type_tag())?;
        w.write(&d.save()?)?;
    }

    w.section("contacts")?;
    w.write_len(p.contacts.len())?;
    for c in &p.contacts {
        w.write(c.type_tag())?;
        w.write(&c.save()?)?;
    }

    w.section("boundary")?;
    w.write_tagged(FixedBc::TAG, &p.fixed_bcs)?;
    w.write_tagged(PrescribedBc::TAG, &p.prescribed_bcs)?;
    w.write_tagged(InitialCondition::TAG, &p.initial_conditions)?;
    w.write_tagged(NodalLoad::TAG, &p.nodal_loads)?;
    w.write_tagged(SurfaceLoad::TAG, &p.surface_loads)?;
    w.write_tagged(EdgeLoad::TAG, &p.edge_loads)?;
    w.write_tagged(BodyLoad::TAG, &p.body_loads)?;
    w.write_tagged(ModelLoad::TAG, &p.model_loads)?;
    w.write(LINEAR_CONSTRAINTS)?;
    w.write(&p.linear_constraints)?;
    w.write_len(p.constraints.len())?;
    for c in &p.constraints {
        w.write(c.type_tag())?;
        w.write(&c.save()?)?;
    }

    w.section("analysis")?;
    w.write(&(p.kind, p.scheme, p.time))
}

pub(crate) fn read_problem<R: Read>(r: &mut DumpReader<R>, registry: &Registry) -> Result<Problem> {
    r.expect_section("dofs")?;
    let mut p = Problem::new(r.read()?);

    r.expect_section("controllers")?;
    for _ in 0..r.read_len()? {
        let (tag, payload) = r.read_item()?;
        let c: LoadController = bincode::deserialize(&payload)?;
        check_tag(&tag, c.type_tag())?;
        p.controllers.push(c);
    }

    r.expect_section("globals")?;
    p.constants = r.read()?;
    for _ in 0..r.read_len()? {
        let (tag, payload) = r.read_item()?;
        let g: GlobalData = bincode::deserialize(&payload)?;
        check_tag(&tag, &g.type_tag)?;
        p.global_data.push(g);
    }

    r.expect_section("materials")?;
    for _ in 0..r.read_len()? {
        let tag: String = r.read()?;
        let name: String = r.read()?;
        let params: Vec<(String, f64)> = r.read()?;
        p.materials.push(registry.create_material(&tag, &name, &params)?);
    }

    r.expect_section("mesh")?;
    p.mesh = r.read()?;
    for _ in 0..r.read_len()? {
        let (tag, payload) = r.read_item()?;
        p.domains.push(registry.create_domain(&tag, &payload)?);
    }

    r.expect_section("contacts")?;
    for _ in 0..r.read_len()? {
        let (tag, payload) = r.read_item()?;
        p.contacts.push(registry.create_contact(&tag, &payload)?);
    }

    r.expect_section("boundary")?;
    p.fixed_bcs = r.read_tagged(FixedBc::TAG)?;
    p.prescribed_bcs = r.read_tagged(PrescribedBc::TAG)?;
    p.initial_conditions = r.read_tagged(InitialCondition::TAG)?;
    p.nodal_loads = r.read_tagged(NodalLoad::TAG)?;
    p.surface_loads = r.read_tagged(SurfaceLoad::TAG)?;
    p.edge_loads = r.read_tagged(EdgeLoad::TAG)?;
    p.body_loads = r.read_tagged(BodyLoad::TAG)?;
    p.model_loads = r.read_tagged(ModelLoad::TAG)?;
    let tag: String = r.read()?;
    check_tag(LINEAR_CONSTRAINTS, &tag)?;
    p.linear_constraints = r.read()?;
    for _ in 0..r.read_len()? {
        let (tag, payload) = r.read_item()?;
        p.constraints.push(registry.create_constraint(&tag, &payload)?);
    }

    r.expect_section("analysis")?;
    let (kind, scheme, time): (AnalysisKind, EquationScheme, TimeInfo) = r.read()?;
    p.scheme = scheme;
    p.kind = kind;
    p.time = time;
    p.set_time(time.current_time, time.time_increment);
    Ok(p)
}

/// Iteration state only.
pub(crate) fn write_state<W: Write>(w: &mut DumpWriter<W>, p: &Problem) -> Result<()> {
    w.section("time")?;
    w.write(&p.time)?;
    w.section("mesh")?;
    w.write(&p.mesh)?;
    w.section("material points")?;
    w.write_len(p.domains.len())?;
    for d in &p.domains {
        w.write(&d.save_state()?)?;
    }
    w.section("contacts")?;
    w.write_len(p.contacts.len())?;
    for c in &p.contacts {
        w.write(&c.save_state()?)?;
    }
    w.section("constraints")?;
    w.write_len(p.constraints.len())?;
    for c in &p.constraints {
        w.write(&c.save_state()?)?;
    }
    Ok(())
}

pub(crate) fn read_state<R: Read>(r: &mut DumpReader<R>, p: &mut Problem) -> Result<()> {
    r.expect_section("time")?;
    let time: TimeInfo = r.read()?;
    r.expect_section("mesh")?;
    let mesh: Mesh = r.read()?;
    check_count("nodes", p.mesh.n_nodes(), mesh.n_nodes())?;
    p.mesh = mesh;
    p.time = time;
    p.set_time(time.current_time, time.time_increment);

    r.expect_section("material points")?;
    check_count("domains", p.domains.len(), r.read_len()?)?;
    for d in p.domains.iter_mut() {
        let bytes: Vec<u8> = r.read()?;
        d.restore_state(&bytes)?;
    }
    r.expect_section("contacts")?;
    check_count("contact interfaces", p.contacts.len(), r.read_len()?)?;
    for c in p.contacts.iter_mut() {
        let bytes: Vec<u8> = r.read()?;
        c.restore_state(&bytes)?;
    }
    r.expect_section("constraints")?;
    check_count("constraints", p.constraints.len(), r.read_len()?)?;
    for c in p.constraints.iter_mut() {
        let bytes: Vec<u8> = r.read()?;
        c.restore_state(&bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_round_trip() {
        let mut w = DumpWriter::new(Vec::new(), DumpMode::Shallow).unwrap();
        w.section("a").unwrap();
        w.write(&42u32).unwrap();
        w.write_tagged("fix", &[1.5f64, 2.5]).unwrap();
        let bytes = w.into_inner();

        let mut r = DumpReader::new(&bytes[..]).unwrap();
        assert_eq!(r.mode(), DumpMode::Shallow);
        r.expect_section("a").unwrap();
        assert_eq!(r.read::<u32>().unwrap(), 42);
        assert_eq!(r.read_tagged::<f64>("fix").unwrap(), vec![1.5, 2.5]);
    }

    #[test]
    fn test_section_mismatch() {
        let mut w = DumpWriter::new(Vec::new(), DumpMode::Full).unwrap();
        w.section("mesh").unwrap();
        let bytes = w.into_inner();
        let mut r = DumpReader::new(&bytes[..]).unwrap();
        assert!(matches!(r.expect_section("dofs"), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(DumpReader::new(&b"XXXX\0\0\0\0"[..]), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_truncated_stream() {
        let mut w = DumpWriter::new(Vec::new(), DumpMode::Full).unwrap();
        w.section("mesh").unwrap();
        let mut bytes = w.into_inner();
        bytes.truncate(bytes.len() - 2);
        let mut r = DumpReader::new(&bytes[..]).unwrap();
        assert!(r.expect_section("mesh").is_err());
    }
}
