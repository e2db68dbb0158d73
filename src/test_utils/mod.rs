#![allow(missing_docs)]

pub(crate) mod cloud;
pub(crate) mod memory_cloud;
pub(crate) mod stores;

pub(crate) use cloud::{TEST_EMAIL, TEST_PASSWORD, signed_in_cloud};
pub(crate) use memory_cloud::InMemoryCloud;
pub(crate) use stores::{FailingStore, local_store, test_expense};
