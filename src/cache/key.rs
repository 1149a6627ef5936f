//! Query keys: structural addresses for cached read results.

use std::collections::BTreeMap;
use std::fmt;

/// REST collections the client reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
  Tasks,
  Projects,
  Teams,
  Departments,
  Companies,
  Comments,
  TimeLogs,
  LeaveRequests,
  Notifications,
  Roles,
  Permissions,
  Invoices,
  TenantUsers,
  Users,
}

impl Resource {
  #[cfg(test)]
  pub const ALL: [Resource; 14] = [
    Resource::Tasks,
    Resource::Projects,
    Resource::Teams,
    Resource::Departments,
    Resource::Companies,
    Resource::Comments,
    Resource::TimeLogs,
    Resource::LeaveRequests,
    Resource::Notifications,
    Resource::Roles,
    Resource::Permissions,
    Resource::Invoices,
    Resource::TenantUsers,
    Resource::Users,
  ];

  /// Collection name, also the REST path segment
  pub fn collection(&self) -> &'static str {
    match self {
      Resource::Tasks => "tasks",
      Resource::Projects => "projects",
      Resource::Teams => "teams",
      Resource::Departments => "departments",
      Resource::Companies => "companies",
      Resource::Comments => "comments",
      Resource::TimeLogs => "time_logs",
      Resource::LeaveRequests => "leave_requests",
      Resource::Notifications => "notifications",
      Resource::Roles => "roles",
      Resource::Permissions => "permissions",
      Resource::Invoices => "invoices",
      Resource::TenantUsers => "tenant_users",
      Resource::Users => "users",
    }
  }

  /// Singular name, used for scoped keys and `<singular>_id` fields
  pub fn singular(&self) -> &'static str {
    match self {
      Resource::Tasks => "task",
      Resource::Projects => "project",
      Resource::Teams => "team",
      Resource::Departments => "department",
      Resource::Companies => "company",
      Resource::Comments => "comment",
      Resource::TimeLogs => "time_log",
      Resource::LeaveRequests => "leave_request",
      Resource::Notifications => "notification",
      Resource::Roles => "role",
      Resource::Permissions => "permission",
      Resource::Invoices => "invoice",
      Resource::TenantUsers => "tenant_user",
      Resource::Users => "user",
    }
  }

  /// Name of the field that references this resource from a child
  pub fn id_field(&self) -> String {
    format!("{}_id", self.singular())
  }

  pub fn path(&self) -> String {
    format!("/{}", self.collection())
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.collection())
  }
}

/// List filter descriptor, also carrying pagination.
///
/// Ordered so that two filters with the same entries are equal and hash
/// the same regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Filter(BTreeMap<String, String>);

impl Filter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
    self.0.insert(name.into(), value.to_string());
    self
  }

  pub fn page(self, page: u64) -> Self {
    self.with("page", page)
  }

  pub fn page_size(self, page_size: u64) -> Self {
    self.with("page_size", page_size)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Query string pairs in key order
  pub fn query_pairs(&self) -> Vec<(String, String)> {
    self
      .0
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }
}

impl fmt::Display for Filter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    write!(f, "{{{}}}", parts.join(", "))
  }
}

/// Address of one cached read result.
///
/// Equality is structural. Keys do not imply each other: `(tasks)` and
/// `(tasks, 7, details)` are unrelated as far as the cache is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryKey {
  /// `(tasks)` or `(tasks, {status=done})`
  List { resource: Resource, filter: Filter },
  /// `(tasks, 7)`
  Detail { resource: Resource, id: u64 },
  /// `(tasks, 7, details)`
  Details { resource: Resource, id: u64 },
  /// `(tasks, project, 42)`
  Scoped {
    resource: Resource,
    parent: Resource,
    parent_id: u64,
  },
  /// `(users, me)`
  CurrentUser,
}

impl QueryKey {
  /// The unfiltered list of a resource
  pub fn all(resource: Resource) -> Self {
    QueryKey::List {
      resource,
      filter: Filter::new(),
    }
  }

  pub fn list(resource: Resource, filter: Filter) -> Self {
    QueryKey::List { resource, filter }
  }

  pub fn detail(resource: Resource, id: u64) -> Self {
    QueryKey::Detail { resource, id }
  }

  pub fn details(resource: Resource, id: u64) -> Self {
    QueryKey::Details { resource, id }
  }

  pub fn scoped(resource: Resource, parent: Resource, parent_id: u64) -> Self {
    QueryKey::Scoped {
      resource,
      parent,
      parent_id,
    }
  }

  /// Collection the key reads from
  pub fn resource(&self) -> Resource {
    match self {
      QueryKey::List { resource, .. }
      | QueryKey::Detail { resource, .. }
      | QueryKey::Details { resource, .. }
      | QueryKey::Scoped { resource, .. } => *resource,
      QueryKey::CurrentUser => Resource::Users,
    }
  }

  /// Entity id for single-entity keys
  pub fn entity_id(&self) -> Option<u64> {
    match self {
      QueryKey::Detail { id, .. } | QueryKey::Details { id, .. } => Some(*id),
      _ => None,
    }
  }

  /// Filtered variant of a list, i.e. not the bare `(resource)` key
  pub fn is_filtered_list_of(&self, of: Resource) -> bool {
    matches!(self, QueryKey::List { resource, filter } if *resource == of && !filter.is_empty())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      QueryKey::List { resource, filter } if filter.is_empty() => write!(f, "({})", resource),
      QueryKey::List { resource, filter } => write!(f, "({}, {})", resource, filter),
      QueryKey::Detail { resource, id } => write!(f, "({}, {})", resource, id),
      QueryKey::Details { resource, id } => write!(f, "({}, {}, details)", resource, id),
      QueryKey::Scoped {
        resource,
        parent,
        parent_id,
      } => write!(f, "({}, {}, {})", resource, parent.singular(), parent_id),
      QueryKey::CurrentUser => write!(f, "(users, me)"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn test_display_matches_tuple_form() {
    assert_eq!(QueryKey::all(Resource::Tasks).to_string(), "(tasks)");
    assert_eq!(
      QueryKey::scoped(Resource::Tasks, Resource::Projects, 42).to_string(),
      "(tasks, project, 42)"
    );
    assert_eq!(
      QueryKey::details(Resource::Tasks, 7).to_string(),
      "(tasks, 7, details)"
    );
    assert_eq!(
      QueryKey::list(Resource::Tasks, Filter::new().with("status", "done")).to_string(),
      "(tasks, {status=done})"
    );
  }

  #[test]
  fn test_equality_is_structural() {
    let a = QueryKey::list(
      Resource::Tasks,
      Filter::new().with("status", "done").with("assignee_id", 3),
    );
    let b = QueryKey::list(
      Resource::Tasks,
      Filter::new().with("assignee_id", 3).with("status", "done"),
    );
    assert_eq!(a, b);

    let set: HashSet<QueryKey> = [a, b].into_iter().collect();
    assert_eq!(set.len(), 1);
  }

  #[test]
  fn test_detail_and_details_are_distinct() {
    assert_ne!(
      QueryKey::detail(Resource::Tasks, 7),
      QueryKey::details(Resource::Tasks, 7)
    );
    assert_ne!(
      QueryKey::all(Resource::Tasks),
      QueryKey::detail(Resource::Tasks, 7)
    );
  }

  #[test]
  fn test_filtered_list_detection() {
    let filtered = QueryKey::list(Resource::Tasks, Filter::new().page(2));
    assert!(filtered.is_filtered_list_of(Resource::Tasks));
    assert!(!QueryKey::all(Resource::Tasks).is_filtered_list_of(Resource::Tasks));
    assert!(!filtered.is_filtered_list_of(Resource::Projects));
  }

  #[test]
  fn test_id_field_names() {
    assert_eq!(Resource::Projects.id_field(), "project_id");
    assert_eq!(Resource::TimeLogs.collection(), "time_logs");
    assert_eq!(Resource::Companies.singular(), "company");
  }
}
