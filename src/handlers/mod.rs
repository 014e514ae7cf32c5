// handlers/mod.rs - HTTP route handlers
//
// account   - public registration/login plus the authenticated whoami
// inventory - item CRUD against the caller's tenant store
// system    - service info and health

pub mod account;
pub mod inventory;
pub mod system;
