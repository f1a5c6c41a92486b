//! The set of known classes, and opening stores by name.
//!
//! Store names have the form `TYPE:NAME`, where `TYPE` selects a class and
//! `NAME` is interpreted by that class. A name without a colon is a plain
//! file name, and a leading colon forces the rest to be taken as one.

use tracing::debug;

use crate::compose::{CONCAT_CLASS, COPY_CLASS, INTERLEAVE_CLASS, REMAP_CLASS};
use crate::encoding::StoreDecoder;
use crate::{Error, Result, Store, StoreClass, StoreFlags, UNKNOWN_CLASS};

/// Name of the class that opens plain file names.
pub const FILE_CLASS_NAME: &str = "file";

/// Classes available for decoding and opening.
///
/// Names and wire tags are unique within a registry.
#[derive(Default)]
pub struct ClassRegistry {
    classes: Vec<&'static dyn StoreClass>,
    fallback: Option<&'static dyn StoreClass>,
}

impl ClassRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the composite classes.
    pub fn core() -> Self {
        Self {
            classes: vec![&CONCAT_CLASS, &INTERLEAVE_CLASS, &REMAP_CLASS, &COPY_CLASS],
            fallback: None,
        }
    }

    /// Decode unrecognized tags into unknown stores instead of failing.
    pub fn with_unknown_fallback(mut self) -> Self {
        self.fallback = Some(&UNKNOWN_CLASS);
        self
    }

    pub fn register(&mut self, class: &'static dyn StoreClass) -> Result<()> {
        if self.find_by_name(class.name()).is_some() {
            return Err(Error::AlreadyExists(format!("class {}", class.name())));
        }
        if self.find_by_id(class.id()).is_some() {
            return Err(Error::AlreadyExists(format!("class tag {}", class.id())));
        }
        debug!(class = class.name(), tag = class.id(), "registered class");
        self.classes.push(class);
        Ok(())
    }

    pub fn find_by_id(&self, id: i32) -> Option<&'static dyn StoreClass> {
        self.classes.iter().copied().find(|c| c.id() == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&'static dyn StoreClass> {
        self.classes.iter().copied().find(|c| c.name() == name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &'static dyn StoreClass> + '_ {
        self.classes.iter().copied()
    }

    /// Decode the store record at the decoder's position.
    pub fn decode(&self, dec: &mut StoreDecoder<'_>) -> Result<Store> {
        let tag = dec.peek_int()?;
        let class = self
            .find_by_id(tag)
            .or(self.fallback)
            .ok_or_else(|| Error::invalid(format!("unknown store type tag {}", tag)))?;
        dec.enter()?;
        let store = class.decode(dec, self);
        dec.leave();
        store
    }

    /// Split `TYPE:NAME` and find the class.
    ///
    /// Untyped names fall back to the file class unless `flags` has
    /// `NO_FILEIO`.
    fn resolve<'n>(
        &self,
        name: &'n str,
        flags: StoreFlags,
    ) -> Result<(&'static dyn StoreClass, &'n str)> {
        let (class_name, rest) = match name.split_once(':') {
            None | Some(("", _)) if flags.contains(StoreFlags::NO_FILEIO) => {
                return Err(Error::invalid(format!(
                    "{:?} has no store type and file fallback is disabled",
                    name
                )));
            }
            None => (FILE_CLASS_NAME, name),
            Some(("", rest)) => (FILE_CLASS_NAME, rest),
            Some(split) => split,
        };
        match self.find_by_name(class_name) {
            Some(class) => Ok((class, rest)),
            None if class_name == FILE_CLASS_NAME => Err(Error::unsupported("plain file names")),
            None => Err(Error::invalid(format!("unknown store type {:?}", class_name))),
        }
    }

    /// Open a store by `TYPE:NAME`.
    pub fn open(&self, name: &str, flags: StoreFlags) -> Result<Store> {
        let (class, rest) = self.resolve(name, flags)?;
        debug!(class = class.name(), name = rest, "opening store");
        let mut store = class.open(rest, flags, self)?;
        if store.name().is_none() {
            store.set_name(Some(rest.to_string()));
        }
        Ok(store)
    }

    /// Check a `TYPE:NAME` without opening it.
    pub fn validate_name(&self, name: &str) -> Result<()> {
        let (class, rest) = self.resolve(name, StoreFlags::empty())?;
        class.validate_name(rest, self)
    }

    /// Open every store of a child-name list (see [`parse_children`]).
    ///
    /// Stores already opened are dropped if a later one fails.
    pub fn open_children(&self, names: &str, flags: StoreFlags) -> Result<Vec<Store>> {
        parse_children(names)?
            .full_names()
            .iter()
            .map(|name| self.open(name, flags))
            .collect()
    }

    pub fn validate_children(&self, names: &str) -> Result<()> {
        parse_children(names)?
            .full_names()
            .iter()
            .try_for_each(|name| self.validate_name(name))
    }
}

/// A parsed child-name list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildNames {
    /// `TYPE:` shared by every child, if any.
    pub prefix: Option<String>,
    pub names: Vec<String>,
}

impl ChildNames {
    /// Each child's name with the shared prefix applied.
    pub fn full_names(&self) -> Vec<String> {
        let prefix = self.prefix.as_deref().unwrap_or("");
        self.names.iter().map(|n| format!("{}{}", prefix, n)).collect()
    }
}

/// Split a child-name list.
///
/// If the first character is not alphanumeric, it separates the names that
/// follow: `,a,b`. Otherwise the list starts with a `TYPE:` applied to every
/// child, and the separator comes right after it: `file:,a,b`. A trailing
/// separator is allowed.
pub fn parse_children(list: &str) -> Result<ChildNames> {
    let (prefix, rest) = match list.chars().next() {
        None => return Err(Error::invalid("empty child list")),
        Some(c) if c.is_alphanumeric() => {
            let colon = list
                .find(':')
                .ok_or_else(|| Error::invalid(format!("child list {:?} has no TYPE: prefix", list)))?;
            (Some(&list[..=colon]), &list[colon + 1..])
        }
        Some(_) => (None, list),
    };

    let sep = rest
        .chars()
        .next()
        .filter(|c| !c.is_alphanumeric())
        .ok_or_else(|| Error::invalid(format!("child list {:?} has no separator", list)))?;
    let body = &rest[sep.len_utf8()..];
    let body = body.strip_suffix(sep).unwrap_or(body);

    if body.is_empty() {
        return Err(Error::invalid("empty child list"));
    }
    let names: Vec<String> = body.split(sep).map(str::to_string).collect();
    if names.iter().any(String::is_empty) {
        return Err(Error::invalid(format!("empty child name in {:?}", list)));
    }

    Ok(ChildNames {
        prefix: prefix.map(str::to_string),
        names,
    })
}
