//! Queue naming conventions.
//!
//! Every payload type owns four queues, derived from its type name:
//!
//! | Kind       | Name                  |
//! |------------|-----------------------|
//! | Priority   | `{Type}.priorityq`    |
//! | In         | `{Type}.inq`          |
//! | Out        | `{Type}.outq`         |
//! | Dlq        | `{Type}.dlq`          |

use crate::envelope::Payload;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use uuid::Uuid;

/// Wake-up channel for pushes to priority and normal queues.
pub const TOPIC_IN: &str = "mq:topic:in";

/// Wake-up channel for pushes to success queues.
pub const TOPIC_OUT: &str = "mq:topic:out";

/// Prefix for reply queues created by [`QueueNames::temp_queue_name`].
pub const TEMP_QUEUE_PREFIX: &str = "mq:tmp:";

/// Purpose of a queue within a payload type's queue set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr)]
pub enum QueueKind {
    #[strum(serialize = "priorityq")]
    Priority,
    #[strum(serialize = "inq")]
    In,
    #[strum(serialize = "outq")]
    Out,
    #[strum(serialize = "dlq")]
    Dlq,
}

impl QueueKind {
    /// Wake-up topic published alongside a push.
    pub fn topic(self) -> &'static str {
        match self {
            QueueKind::Out => TOPIC_OUT,
            QueueKind::Priority | QueueKind::In | QueueKind::Dlq => TOPIC_IN,
        }
    }

    /// Whether messages on this queue are waiting to be handled.
    pub fn is_inbound(self) -> bool {
        matches!(self, QueueKind::Priority | QueueKind::In)
    }
}

/// The four queue names of one payload type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueNames {
    type_name: String,
    priority: String,
    input: String,
    out: String,
    dlq: String,
}

impl QueueNames {
    pub fn new(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        let name = |kind: QueueKind| format!("{type_name}.{kind}");
        Self {
            priority: name(QueueKind::Priority),
            input: name(QueueKind::In),
            out: name(QueueKind::Out),
            dlq: name(QueueKind::Dlq),
            type_name,
        }
    }

    /// Queue names for a payload type.
    pub fn of<T: Payload>() -> Self {
        Self::new(T::TYPE_NAME)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn priority(&self) -> &str {
        &self.priority
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn out(&self) -> &str {
        &self.out
    }

    pub fn dlq(&self) -> &str {
        &self.dlq
    }

    pub fn get(&self, kind: QueueKind) -> &str {
        match kind {
            QueueKind::Priority => &self.priority,
            QueueKind::In => &self.input,
            QueueKind::Out => &self.out,
            QueueKind::Dlq => &self.dlq,
        }
    }

    /// All queues of the type, in `QueueKind` order.
    pub fn iter(&self) -> impl Iterator<Item = (QueueKind, &str)> {
        QueueKind::iter().map(move |kind| (kind, self.get(kind)))
    }

    /// Split a queue name back into its type name and kind.
    ///
    /// Returns `None` for names that do not follow the convention, such as
    /// temporary reply queues.
    pub fn parse(queue_name: &str) -> Option<(&str, QueueKind)> {
        let (type_name, suffix) = queue_name.rsplit_once('.')?;
        if type_name.is_empty() {
            return None;
        }
        let kind = suffix.parse().ok()?;
        Some((type_name, kind))
    }

    /// Wake-up topic for a push to `queue_name`.
    ///
    /// Unrecognised names (reply queues) signal on [`TOPIC_IN`].
    pub fn topic_for(queue_name: &str) -> &'static str {
        Self::parse(queue_name).map_or(TOPIC_IN, |(_, kind)| kind.topic())
    }

    /// A process-unique queue name for request/reply correlation.
    pub fn temp_queue_name() -> String {
        format!("{TEMP_QUEUE_PREFIX}{}", Uuid::new_v4())
    }

    pub fn is_temp_queue(queue_name: &str) -> bool {
        queue_name.starts_with(TEMP_QUEUE_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_follow_convention() {
        let names = QueueNames::new("Greeting");
        assert_eq!(names.priority(), "Greeting.priorityq");
        assert_eq!(names.input(), "Greeting.inq");
        assert_eq!(names.out(), "Greeting.outq");
        assert_eq!(names.dlq(), "Greeting.dlq");
        assert_eq!(names.type_name(), "Greeting");
    }

    #[test]
    fn test_names_are_deterministic() {
        assert_eq!(QueueNames::new("Echo"), QueueNames::new("Echo"));
    }

    #[test]
    fn test_distinct_types_never_collide() {
        let a = QueueNames::new("Order");
        let b = QueueNames::new("Order.inq");
        for (_, left) in a.iter() {
            for (_, right) in b.iter() {
                assert_ne!(left, right);
            }
        }
    }

    #[test]
    fn test_iter_covers_every_kind() {
        let names = QueueNames::new("Echo");
        let all: Vec<_> = names.iter().map(|(_, name)| name.to_string()).collect();
        assert_eq!(all, vec!["Echo.priorityq", "Echo.inq", "Echo.outq", "Echo.dlq"]);
    }

    #[test]
    fn test_parse_round_trips() {
        let names = QueueNames::new("billing.Invoice");
        for (kind, name) in names.iter() {
            assert_eq!(QueueNames::parse(name), Some(("billing.Invoice", kind)));
        }
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(QueueNames::parse("plain"), None);
        assert_eq!(QueueNames::parse("Greeting.unknown"), None);
        assert_eq!(QueueNames::parse(".inq"), None);
    }

    #[test]
    fn test_topic_for() {
        assert_eq!(QueueNames::topic_for("Greeting.inq"), TOPIC_IN);
        assert_eq!(QueueNames::topic_for("Greeting.priorityq"), TOPIC_IN);
        assert_eq!(QueueNames::topic_for("Greeting.outq"), TOPIC_OUT);
        assert_eq!(QueueNames::topic_for("Greeting.dlq"), TOPIC_IN);
        assert_eq!(QueueNames::topic_for("mq:tmp:abc"), TOPIC_IN);
    }

    #[test]
    fn test_temp_queue_names_are_unique() {
        let a = QueueNames::temp_queue_name();
        let b = QueueNames::temp_queue_name();
        assert_ne!(a, b);
        assert!(QueueNames::is_temp_queue(&a));
        assert!(!QueueNames::is_temp_queue("Greeting.inq"));
    }
}
