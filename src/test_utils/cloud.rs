use crate::{
    cloud::{IdentityProvider, Session},
    test_utils::InMemoryCloud,
};

pub(crate) const TEST_EMAIL: &str = "test@example.com";
pub(crate) const TEST_PASSWORD: &str = "averysafeandsecurepassword";

/// A fresh in-memory platform with [TEST_EMAIL] registered and signed in.
pub(crate) async fn signed_in_cloud() -> (InMemoryCloud, Session) {
    let cloud = InMemoryCloud::new();
    let session = cloud
        .sign_up(TEST_EMAIL, TEST_PASSWORD)
        .await
        .expect("could not sign up the test user");

    (cloud, session)
}
