//! Topic naming: `<namespace>/<deviceId>/<entityId>/<kind>`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Command,
    State,
    Availability,
}

impl TopicKind {
    pub fn segment(self) -> &'static str {
        match self {
            TopicKind::Command => "set",
            TopicKind::State => "state",
            TopicKind::Availability => "availability",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Topics {
    namespace: String,
    device_id: String,
}

impl Topics {
    pub fn new(namespace: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            device_id: device_id.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn entity(&self, entity_id: &str, kind: TopicKind) -> String {
        format!("{}/{}/{}/{}", self.namespace, self.device_id, entity_id, kind.segment())
    }

    pub fn unique_id(&self, entity_id: &str) -> String {
        format!("{}_{}_{}", self.namespace, self.device_id, entity_id)
    }

    pub fn discovery(&self, prefix: &str, entity_id: &str) -> String {
        format!("{}/switch/{}/config", prefix, self.unique_id(entity_id))
    }

    /// Inverse of `entity(.., Command)`, `None` for anything else.
    pub fn command_entity<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix('/')?
            .strip_prefix(self.device_id.as_str())?
            .strip_prefix('/')?;
        let entity_id = rest.strip_suffix(TopicKind::Command.segment())?.strip_suffix('/')?;
        (!entity_id.is_empty() && !entity_id.contains('/')).then_some(entity_id)
    }
}
