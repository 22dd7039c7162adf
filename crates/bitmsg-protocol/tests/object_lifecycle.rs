//! Integration tests for bitmsg-protocol.
//!
//! Exercises the full object lifecycle across modules: identity
//! generation, pubkey publication, msg and broadcast construction,
//! decryption, signature verification, and proof-of-work, all with
//! locally generated keys.

use bitmsg_protocol::address::BitmessageAddress;
use bitmsg_protocol::object::ObjectMessage;
use bitmsg_protocol::payload::{ObjectPayload, PubkeyPayload};
use bitmsg_protocol::plaintext::Plaintext;
use bitmsg_protocol::pow::{check_proof_of_work, initial_hash, pow_target, pow_value};
use bitmsg_protocol::privkey::PrivateKey;
use bitmsg_protocol::pubkey::Pubkey;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fresh v4 identity on stream 1.
fn identity() -> BitmessageAddress {
    let key = PrivateKey::new_random(4, 1, 1000, 1000).expect("generate");
    BitmessageAddress::from_private_key(key).expect("address")
}

/// Trivial-difficulty proof of work for test objects.
fn stamp(object: &mut ObjectMessage, now: i64) {
    let payload = object.bytes_without_nonce();
    let ttl = object.expires_time.saturating_sub(now).max(0) as u64;
    let target = pow_target(payload.len(), ttl, 2, 2);
    let hash = initial_hash(object);
    let mut nonce = 0u64;
    while pow_value(&nonce.to_be_bytes(), &hash) > target {
        nonce += 1;
    }
    object.nonce = Some(nonce.to_be_bytes());
}

// ---------------------------------------------------------------------------
// Address properties
// ---------------------------------------------------------------------------

#[test]
fn generated_identity_roundtrips_as_string() {
    let address = identity();
    let parsed: BitmessageAddress = address.as_str().parse().expect("parse");
    assert_eq!(parsed.version(), address.version());
    assert_eq!(parsed.stream(), address.stream());
    assert_eq!(parsed.ripe(), address.ripe());
    assert_eq!(parsed.tag(), address.tag());
    assert_eq!(parsed.to_string(), address.to_string());
}

#[test]
fn generated_ripe_has_leading_zero_for_v3_and_v4() {
    for version in [3u64, 4] {
        let key = PrivateKey::new_random(version, 1, 1000, 1000).expect("generate");
        assert_eq!(key.pubkey().ripe()[0], 0, "version {version}");
    }
}

// ---------------------------------------------------------------------------
// End-to-end msg path
// ---------------------------------------------------------------------------

#[test]
fn msg_sign_encrypt_decrypt_verify() {
    let sender = identity();
    let recipient = identity();

    let mut draft = Plaintext::msg(sender.clone(), recipient.clone(), "hi", "there");
    let mut object = ObjectMessage::msg(&mut draft, 1_700_000_300).expect("build");
    let now = 1_700_000_000;
    stamp(&mut object, now);
    assert!(check_proof_of_work(&object, now, 2, 2).is_ok());

    // Receiver side: parse from wire, try own key, verify.
    let received = ObjectMessage::from_bytes(&object.to_bytes()).expect("parse");
    assert_eq!(received.inventory_vector(), object.inventory_vector());

    let ObjectPayload::Msg(encrypted) = &received.payload else {
        panic!("expected msg payload");
    };
    let private_key = recipient.private_key().expect("identity");
    let plaintext = encrypted
        .decrypt(private_key.private_encryption_key())
        .expect("decrypt");
    assert!(received.verify_plaintext_signature(&plaintext));
    assert_eq!(plaintext.subject().as_deref(), Some("hi"));
    assert_eq!(plaintext.body().as_deref(), Some("there"));
    assert_eq!(plaintext.from.as_str(), sender.as_str());
    assert_eq!(plaintext.destination_ripe.as_ref(), Some(recipient.ripe()));

    // A stranger's key opens nothing.
    let stranger = identity();
    assert!(encrypted
        .decrypt(stranger.private_key().expect("identity").private_encryption_key())
        .is_err());
}

// ---------------------------------------------------------------------------
// Pubkey distribution path
// ---------------------------------------------------------------------------

#[test]
fn v4_pubkey_reaches_a_contact_who_knows_the_address() {
    let owner = identity();
    let object = ObjectMessage::pubkey(&owner, 1, 1_700_000_000).expect("build");

    // The contact only knows the address string.
    let contact_view: BitmessageAddress = owner.as_str().parse().expect("parse");
    let ObjectPayload::Pubkey(PubkeyPayload::Encrypted(sealed)) = &object.payload else {
        panic!("expected encrypted v4 pubkey");
    };
    assert_eq!(&sealed.tag, contact_view.tag());

    let body = sealed
        .decrypt(contact_view.public_decryption_key())
        .expect("decrypt");
    assert!(object.verify_pubkey_signature(Some(&sealed.tag), &body));
    assert_eq!(body.ripe(), *contact_view.ripe());

    let mut contact = contact_view;
    contact
        .attach_pubkey(Pubkey::V4 {
            tag: sealed.tag,
            inner: body,
        })
        .expect("attach");
    assert!(contact.pubkey().is_some());
}

#[test]
fn pubkey_of_wrong_address_fails_attach() {
    let owner = identity();
    let other = identity();
    let object = ObjectMessage::pubkey(&owner, 1, 1_700_000_000).expect("build");
    let ObjectPayload::Pubkey(PubkeyPayload::Encrypted(sealed)) = &object.payload else {
        panic!("expected encrypted v4 pubkey");
    };
    let body = sealed
        .decrypt(owner.public_decryption_key())
        .expect("decrypt");

    let mut wrong: BitmessageAddress = other.as_str().parse().expect("parse");
    assert!(wrong
        .attach_pubkey(Pubkey::V4 {
            tag: sealed.tag,
            inner: body,
        })
        .is_err());
}

// ---------------------------------------------------------------------------
// Proof of work property
// ---------------------------------------------------------------------------

#[test]
fn pow_holds_for_declared_length_and_ttl() {
    let sender = identity();
    let mut plaintext = Plaintext::broadcast(sender, "pow", "property");
    let mut object = ObjectMessage::broadcast(&mut plaintext, 1_700_000_600).expect("build");
    let now = 1_700_000_000;
    stamp(&mut object, now);

    let payload = object.bytes_without_nonce();
    let ttl = (object.expires_time - now) as u64;
    let target = pow_target(payload.len(), ttl, 2, 2);
    let nonce = object.nonce.expect("stamped");
    assert!(pow_value(&nonce, &initial_hash(&object)) <= target);

    // Tampering with a signed-and-stamped field invalidates the stamp
    // against the network-minimum parameters.
    object.expires_time += 1;
    assert!(check_proof_of_work(&object, now, 1000, 1000).is_err());
}
