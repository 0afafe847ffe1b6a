use gatekeeper::auth::{hash_password, verify_password};

#[test]
fn test_password_hashing_and_verification() {
    let password = "SecureP@ssw0rd";
    let hash = hash_password(password).unwrap();

    assert_ne!(password, hash);
    assert!(hash.starts_with("$argon2id$"));
    assert!(verify_password(&hash, password));
    assert!(!verify_password(&hash, "SecureP@ssw0rd!"));
}

#[test]
fn test_each_hash_is_salted() {
    let first = hash_password("same password").unwrap();
    let second = hash_password("same password").unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_garbage_hash_never_verifies() {
    assert!(!verify_password("", "anything"));
    assert!(!verify_password("$unknown$abc", "anything"));
}
