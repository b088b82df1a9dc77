use std::collections::HashMap;

/// Attribute names used by the GitHub schema.
pub mod attr {
    pub const USER_ID: &str = ":user/id";
    pub const USER_LOGIN: &str = ":user/login";
    pub const USER_AVATAR_URL: &str = ":user/avatar-url";
    pub const USER_NAME: &str = ":user/name";
    pub const USER_TYPE: &str = ":user/type";

    pub const ISSUE_ID: &str = ":issue/id";
    pub const ISSUE_CANONICAL_NAME: &str = ":issue/canonical-name";
    pub const ISSUE_NUMBER: &str = ":issue/number";
    pub const ISSUE_TITLE: &str = ":issue/title";
    pub const ISSUE_PULL: &str = ":issue/pull?";
    pub const ISSUE_STATE: &str = ":issue/state";
    pub const ISSUE_STATE_REASON: &str = ":issue/state-reason";
    pub const ISSUE_BODY: &str = ":issue/body";
    pub const ISSUE_CREATED_AT: &str = ":issue/created-at";
    pub const ISSUE_UPDATED_AT: &str = ":issue/updated-at";
    pub const ISSUE_USER: &str = ":issue/user";
    pub const ISSUE_ASSIGNEES: &str = ":issue/assignees";
    pub const ISSUE_LABELS: &str = ":issue/labels";
    pub const ISSUE_REFERENCES: &str = ":issue/references";
    pub const ISSUE_REPOSITORY: &str = ":issue/repository";

    pub const LABEL_ID: &str = ":label/id";
    pub const LABEL_CANONICAL_NAME: &str = ":label/canonical-name";
    pub const LABEL_NAME: &str = ":label/name";
    pub const LABEL_COLOR: &str = ":label/color";
    pub const LABEL_DESCRIPTION: &str = ":label/description";

    pub const COMMENT_ID: &str = ":comment/id";
    pub const COMMENT_USER: &str = ":comment/user";
    pub const COMMENT_BODY: &str = ":comment/body";
    pub const COMMENT_CREATED_AT: &str = ":comment/created-at";
    pub const COMMENT_UPDATED_AT: &str = ":comment/updated-at";
    pub const COMMENT_ISSUE: &str = ":comment/issue";
    pub const COMMENT_REFERENCES: &str = ":comment/references";

    pub const REPOSITORY_ID: &str = ":repository/id";
    pub const REPOSITORY_FULL_NAME: &str = ":repository/full-name";
    pub const REPOSITORY_NAME: &str = ":repository/name";
    pub const REPOSITORY_OWNER: &str = ":repository/owner";

    pub const NOTIFICATION_ID: &str = ":notification/id";
    pub const NOTIFICATION_REASON: &str = ":notification/reason";
    pub const NOTIFICATION_UNREAD: &str = ":notification/unread";
    pub const NOTIFICATION_UPDATED_AT: &str = ":notification/updated-at";
    pub const NOTIFICATION_LAST_READ_AT: &str = ":notification/last-read-at";
    pub const NOTIFICATION_TITLE: &str = ":notification/title";
    pub const NOTIFICATION_TYPE: &str = ":notification/type";
    pub const NOTIFICATION_SUBJECT: &str = ":notification/subject";
    pub const NOTIFICATION_REPOSITORY: &str = ":notification/repository";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uniqueness {
    Plain,
    /// Upsert key: at most one entity holds any given value.
    Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Scalar,
    Ref,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Ref => "reference",
        }
    }
}

/// Declared shape of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSpec {
    pub uniqueness: Uniqueness,
    pub cardinality: Cardinality,
    pub value_type: ValueType,
}

impl AttrSpec {
    pub const fn scalar() -> Self {
        Self {
            uniqueness: Uniqueness::Plain,
            cardinality: Cardinality::One,
            value_type: ValueType::Scalar,
        }
    }

    /// Unique identity attributes are always scalar and cardinality-one.
    pub const fn identity() -> Self {
        Self {
            uniqueness: Uniqueness::Identity,
            cardinality: Cardinality::One,
            value_type: ValueType::Scalar,
        }
    }

    pub const fn reference() -> Self {
        Self {
            uniqueness: Uniqueness::Plain,
            cardinality: Cardinality::One,
            value_type: ValueType::Ref,
        }
    }

    pub const fn many_refs() -> Self {
        Self {
            uniqueness: Uniqueness::Plain,
            cardinality: Cardinality::Many,
            value_type: ValueType::Ref,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.uniqueness == Uniqueness::Identity
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    pub fn is_ref(&self) -> bool {
        self.value_type == ValueType::Ref
    }
}

/// Attribute table checked on every transact.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    attrs: HashMap<String, AttrSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, attr: &str, spec: AttrSpec) -> Self {
        self.attrs.insert(attr.to_string(), spec);
        self
    }

    pub fn get(&self, attr: &str) -> Option<&AttrSpec> {
        self.attrs.get(attr)
    }

    pub fn is_identity(&self, attr: &str) -> bool {
        self.get(attr).is_some_and(AttrSpec::is_identity)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Schema for users, issues, labels, comments, repositories, and notifications.
    pub fn github() -> Self {
        use attr::*;

        Self::new()
            .with(USER_ID, AttrSpec::identity())
            .with(USER_LOGIN, AttrSpec::identity())
            .with(USER_AVATAR_URL, AttrSpec::scalar())
            .with(USER_NAME, AttrSpec::scalar())
            .with(USER_TYPE, AttrSpec::scalar())
            .with(ISSUE_ID, AttrSpec::identity())
            .with(ISSUE_CANONICAL_NAME, AttrSpec::identity())
            .with(ISSUE_NUMBER, AttrSpec::scalar())
            .with(ISSUE_TITLE, AttrSpec::scalar())
            .with(ISSUE_PULL, AttrSpec::scalar())
            .with(ISSUE_STATE, AttrSpec::scalar())
            .with(ISSUE_STATE_REASON, AttrSpec::scalar())
            .with(ISSUE_BODY, AttrSpec::scalar())
            .with(ISSUE_CREATED_AT, AttrSpec::scalar())
            .with(ISSUE_UPDATED_AT, AttrSpec::scalar())
            .with(ISSUE_USER, AttrSpec::reference())
            .with(ISSUE_ASSIGNEES, AttrSpec::many_refs())
            .with(ISSUE_LABELS, AttrSpec::many_refs())
            .with(ISSUE_REFERENCES, AttrSpec::many_refs())
            .with(ISSUE_REPOSITORY, AttrSpec::reference())
            .with(LABEL_ID, AttrSpec::identity())
            .with(LABEL_CANONICAL_NAME, AttrSpec::identity())
            .with(LABEL_NAME, AttrSpec::scalar())
            .with(LABEL_COLOR, AttrSpec::scalar())
            .with(LABEL_DESCRIPTION, AttrSpec::scalar())
            .with(COMMENT_ID, AttrSpec::identity())
            .with(COMMENT_USER, AttrSpec::reference())
            .with(COMMENT_BODY, AttrSpec::scalar())
            .with(COMMENT_CREATED_AT, AttrSpec::scalar())
            .with(COMMENT_UPDATED_AT, AttrSpec::scalar())
            .with(COMMENT_ISSUE, AttrSpec::reference())
            .with(COMMENT_REFERENCES, AttrSpec::many_refs())
            .with(REPOSITORY_ID, AttrSpec::identity())
            .with(REPOSITORY_FULL_NAME, AttrSpec::identity())
            .with(REPOSITORY_NAME, AttrSpec::scalar())
            .with(REPOSITORY_OWNER, AttrSpec::reference())
            .with(NOTIFICATION_ID, AttrSpec::identity())
            .with(NOTIFICATION_REASON, AttrSpec::scalar())
            .with(NOTIFICATION_UNREAD, AttrSpec::scalar())
            .with(NOTIFICATION_UPDATED_AT, AttrSpec::scalar())
            .with(NOTIFICATION_LAST_READ_AT, AttrSpec::scalar())
            .with(NOTIFICATION_TITLE, AttrSpec::scalar())
            .with(NOTIFICATION_TYPE, AttrSpec::scalar())
            .with(NOTIFICATION_SUBJECT, AttrSpec::reference())
            .with(NOTIFICATION_REPOSITORY, AttrSpec::reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_schema_declares_identity_attributes() {
        let schema = Schema::github();
        for a in [
            attr::USER_ID,
            attr::USER_LOGIN,
            attr::ISSUE_ID,
            attr::ISSUE_CANONICAL_NAME,
            attr::LABEL_CANONICAL_NAME,
            attr::COMMENT_ID,
            attr::REPOSITORY_FULL_NAME,
            attr::NOTIFICATION_ID,
        ] {
            assert!(schema.is_identity(a), "{a} should be an identity attribute");
        }
        assert!(!schema.is_identity(attr::ISSUE_TITLE));
    }

    #[test]
    fn reference_sets_are_cardinality_many() {
        let schema = Schema::github();
        for a in [
            attr::ISSUE_LABELS,
            attr::ISSUE_ASSIGNEES,
            attr::ISSUE_REFERENCES,
            attr::COMMENT_REFERENCES,
        ] {
            let spec = schema.get(a).unwrap();
            assert!(spec.is_many() && spec.is_ref(), "{a}");
        }
        let author = schema.get(attr::COMMENT_USER).unwrap();
        assert!(author.is_ref() && !author.is_many());
    }

    #[test]
    fn unknown_attribute_is_absent() {
        assert!(Schema::github().get(":issue/nope").is_none());
    }
}
