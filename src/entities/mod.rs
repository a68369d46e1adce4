pub mod permission_edge;

pub use permission_edge::Entity as PermissionEdge;
