//! The bundle's ordered set of datalinks.

use mlppp_core::{LinkId, PhysType};

use crate::datalink::{Datalink, LinkConfig, LinkName};
use crate::error::{BundleError, BundleResult};
use crate::protocol::LinkProtocol;

/// Ordered, owned set of datalinks. Names are unique.
#[derive(Debug, Default)]
pub struct DatalinkCollection {
    links: Vec<Datalink>,
    next_id: u32,
}

impl DatalinkCollection {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of links.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether there are no links.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Links in order.
    pub fn iter(&self) -> impl Iterator<Item = &Datalink> {
        self.links.iter()
    }

    /// Links in order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Datalink> {
        self.links.iter_mut()
    }

    /// Link ids in order.
    #[must_use]
    pub fn ids(&self) -> Vec<LinkId> {
        self.links.iter().map(Datalink::id).collect()
    }

    /// Look a link up by id.
    #[must_use]
    pub fn get(&self, id: LinkId) -> Option<&Datalink> {
        self.links.iter().find(|l| l.id() == id)
    }

    /// Look a link up by id, mutably.
    pub fn get_mut(&mut self, id: LinkId) -> Option<&mut Datalink> {
        self.links.iter_mut().find(|l| l.id() == id)
    }

    /// Look a link up by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Datalink> {
        self.links.iter().find(|l| l.name() == name)
    }

    /// Id of the link called `name`.
    ///
    /// # Errors
    ///
    /// [`BundleError::UnknownLink`] if there is none.
    pub fn id_of(&self, name: &str) -> BundleResult<LinkId> {
        self.by_name(name)
            .map(Datalink::id)
            .ok_or_else(|| BundleError::UnknownLink(name.to_owned()))
    }

    fn allocate(&mut self, name: &str) -> BundleResult<(LinkId, LinkName)> {
        let name = LinkName::new(name);
        if self.by_name(&name).is_some() {
            return Err(BundleError::DuplicateLink(name.into_string()));
        }
        let id = LinkId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        Ok((id, name))
    }

    /// Append a new closed link. Names longer than 20 bytes are truncated.
    ///
    /// # Errors
    ///
    /// [`BundleError::DuplicateLink`] if the (truncated) name is taken.
    pub fn push(
        &mut self,
        name: &str,
        config: LinkConfig,
        protocol: Box<dyn LinkProtocol>,
    ) -> BundleResult<LinkId> {
        let (id, name) = self.allocate(name)?;
        self.links.push(Datalink::new(id, name, config, protocol));
        Ok(id)
    }

    /// Append a closed copy of `template` called `name`.
    ///
    /// # Errors
    ///
    /// [`BundleError::UnknownLink`] if `template` is gone,
    /// [`BundleError::DuplicateLink`] if `name` is taken.
    pub fn clone_link(&mut self, template: LinkId, name: &str) -> BundleResult<LinkId> {
        if self.get(template).is_none() {
            return Err(BundleError::UnknownLink(template.to_string()));
        }
        let (id, name) = self.allocate(name)?;
        let copy = self
            .get(template)
            .map(|t| t.duplicate(id, name))
            .ok_or_else(|| BundleError::UnknownLink(template.to_string()))?;
        self.links.push(copy);
        Ok(id)
    }

    /// Detach a link.
    ///
    /// # Errors
    ///
    /// [`BundleError::UnknownLink`] if there is no such link.
    pub fn remove(&mut self, id: LinkId) -> BundleResult<Datalink> {
        let idx = self
            .links
            .iter()
            .position(|l| l.id() == id)
            .ok_or_else(|| BundleError::UnknownLink(id.to_string()))?;
        Ok(self.links.remove(idx))
    }

    /// Detach every link for which `unusable` holds, never touching a link
    /// that is carrying traffic. Returns the detached links in order.
    pub fn clean(&mut self, unusable: impl Fn(&Datalink) -> bool) -> Vec<Datalink> {
        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.links)
            .into_iter()
            .partition(|l| !l.is_active() && unusable(l));
        self.links = kept;
        gone
    }

    /// Union of every link's physical type.
    #[must_use]
    pub fn phys_union(&self) -> PhysType {
        self.links
            .iter()
            .fold(PhysType::empty(), |acc, l| acc | l.phys_type())
    }

    /// Number of links carrying traffic.
    #[must_use]
    pub fn up_count(&self) -> usize {
        self.links.iter().filter(|l| l.is_up()).count()
    }

    /// Whether any link is negotiating or carrying traffic.
    #[must_use]
    pub fn any_active(&self) -> bool {
        self.links.iter().any(Datalink::is_active)
    }

    /// Whether any link is still shutting down.
    #[must_use]
    pub fn any_closing(&self) -> bool {
        self.links
            .iter()
            .any(|l| l.state() == crate::datalink::LinkState::Closing)
    }

    /// Whether every link is closed.
    #[must_use]
    pub fn all_closed(&self) -> bool {
        self.links.iter().all(Datalink::is_closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalink::{Endpoint, LinkState};
    use crate::protocol::NullProtocol;
    use mlppp_core::LinkSignal;
    use std::os::unix::net::UnixStream;

    fn config(phys_type: PhysType) -> LinkConfig {
        LinkConfig {
            phys_type,
            endpoint: Endpoint::None,
        }
    }

    #[test]
    fn test_push_rejects_duplicate_after_truncation() {
        let mut c = DatalinkCollection::new();
        c.push("a-very-long-link-name-1", config(PhysType::AUTO), Box::new(NullProtocol))
            .unwrap();
        let err = c
            .push("a-very-long-link-name-2", config(PhysType::AUTO), Box::new(NullProtocol))
            .unwrap_err();
        assert!(matches!(err, BundleError::DuplicateLink(_)));
        assert_eq!(c.len(), 1);
        assert!(c.by_name("a-very-long-link-nam").is_some());
    }

    #[test]
    fn test_clone_copies_template() {
        let mut c = DatalinkCollection::new();
        let t = c
            .push("deflink", config(PhysType::DIRECT), Box::new(NullProtocol))
            .unwrap();
        let id = c.clone_link(t, "second").unwrap();
        assert_ne!(id, t);
        assert_eq!(c.ids(), vec![t, id]);
        assert_eq!(c.get(id).unwrap().phys_type(), PhysType::DIRECT);
        assert!(matches!(
            c.clone_link(LinkId(99), "third"),
            Err(BundleError::UnknownLink(_))
        ));
        assert!(matches!(c.clone_link(t, "second"), Err(BundleError::DuplicateLink(_))));
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut c = DatalinkCollection::new();
        let a = c.push("a", config(PhysType::AUTO), Box::new(NullProtocol)).unwrap();
        c.remove(a).unwrap();
        let b = c.push("a", config(PhysType::AUTO), Box::new(NullProtocol)).unwrap();
        assert_ne!(a, b);
        assert!(c.remove(a).is_err());
    }

    #[test]
    fn test_clean_never_drops_active_links() {
        let mut c = DatalinkCollection::new();
        let up = c.push("up", config(PhysType::DIRECT), Box::new(NullProtocol)).unwrap();
        c.push("down", config(PhysType::DIRECT), Box::new(NullProtocol)).unwrap();
        c.push("keep", config(PhysType::INTERACTIVE), Box::new(NullProtocol)).unwrap();

        let (a, _b) = UnixStream::pair().unwrap();
        let link = c.get_mut(up).unwrap();
        for s in link.attach(Box::new(a)) {
            link.apply_signal(&s);
        }
        assert_eq!(link.state(), LinkState::Open);

        let gone = c.clean(|l| l.phys_type().intersects(PhysType::DIRECT));
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].name(), "down");
        assert_eq!(c.len(), 2);
        assert_eq!(c.up_count(), 1);
    }

    #[test]
    fn test_liveness_queries() {
        let mut c = DatalinkCollection::new();
        assert!(c.all_closed());
        let id = c.push("l", config(PhysType::DDIAL), Box::new(NullProtocol)).unwrap();
        assert_eq!(c.phys_union(), PhysType::DDIAL);

        let (a, _b) = UnixStream::pair().unwrap();
        c.get_mut(id).unwrap().attach(Box::new(a));
        assert!(c.any_active());
        assert!(!c.all_closed());

        let link = c.get_mut(id).unwrap();
        link.close();
        assert!(c.any_closing());
        c.get_mut(id).unwrap().apply_signal(&LinkSignal::Closed);
        assert!(c.all_closed());
    }
}
