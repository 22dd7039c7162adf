//! Inbound object handling.
//!
//! Every object the gossip layer stores lands here exactly once.
//! Dispatch is by object type:
//!
//! - `getpubkey` — answer if the target is one of our identities,
//!   at most once per pubkey TTL
//! - `pubkey` — attach to the matching contact, then flush every
//!   message that was waiting for it
//! - `msg` — trial-decrypt against every identity; verify before
//!   delivering
//! - `broadcast` — trial-decrypt against matching subscriptions
//!
//! Decryption failures are expected and silent — most objects are not
//! for us. A signature failure after a successful decryption is
//! logged and the object dropped without notification. Listener
//! panics are nobody's problem but the listener's; repository errors
//! are logged and the loop continues.

use std::sync::Arc;

use bitmsg_protocol::object::ObjectMessage;
use bitmsg_protocol::payload::{BroadcastPayload, ObjectPayload, PubkeyPayload};
use bitmsg_protocol::plaintext::Plaintext;
use bitmsg_protocol::pubkey::Pubkey;
use bitmsg_types::{BmError, LabelType, MessageStatus, ObjectType};

use crate::context::Context;

/// Handles one freshly stored object.
pub async fn receive_object(ctx: &Arc<Context>, object: ObjectMessage) {
    match object.object_kind() {
        ObjectType::GetPubkey => handle_getpubkey(ctx, &object).await,
        ObjectType::Pubkey => handle_pubkey(ctx, &object).await,
        ObjectType::Msg => handle_msg(ctx, &object),
        ObjectType::Broadcast => handle_broadcast(ctx, &object),
        ObjectType::Unknown(_) => handle_generic(ctx, &object),
    }
}

// ---------------------------------------------------------------------------
// getpubkey
// ---------------------------------------------------------------------------

async fn handle_getpubkey(ctx: &Arc<Context>, object: &ObjectMessage) {
    let ObjectPayload::GetPubkey(request) = &object.payload else {
        return;
    };
    let Some(identity) = ctx.addresses.find_identity(request.target.as_ref()) else {
        return;
    };
    if identity.private_key().is_none() {
        return;
    }
    tracing::info!(identity = %identity, "pubkey requested by the network");
    if let Err(e) = ctx.send_pubkey(&identity, object.stream).await {
        tracing::warn!(identity = %identity, error = %e, "failed to publish pubkey");
    }
}

// ---------------------------------------------------------------------------
// pubkey
// ---------------------------------------------------------------------------

async fn handle_pubkey(ctx: &Arc<Context>, object: &ObjectMessage) {
    let ObjectPayload::Pubkey(payload) = &object.payload else {
        return;
    };
    let (mut contact, pubkey) = match payload {
        PubkeyPayload::Plain(pubkey) => {
            let Some(contact) = ctx.addresses.find_contact(&pubkey.ripe()[..]) else {
                return;
            };
            if let Pubkey::V3(body) = pubkey {
                if !object.verify_pubkey_signature(None, body) {
                    tracing::warn!(contact = %contact, "pubkey signature invalid, ignoring");
                    return;
                }
            }
            (contact, pubkey.clone())
        }
        PubkeyPayload::Encrypted(sealed) => {
            let Some(contact) = ctx.addresses.find_contact(&sealed.tag[..]) else {
                return;
            };
            let body = match sealed.decrypt(contact.public_decryption_key()) {
                Ok(body) => body,
                // Not decryptable with this contact's key; not ours.
                Err(BmError::DecryptionFailed) => return,
                Err(e) => {
                    tracing::debug!(contact = %contact, error = %e, "undecodable v4 pubkey");
                    return;
                }
            };
            if !object.verify_pubkey_signature(Some(&sealed.tag), &body) {
                tracing::warn!(contact = %contact, "pubkey signature invalid, ignoring");
                return;
            }
            (
                contact,
                Pubkey::V4 {
                    tag: sealed.tag,
                    inner: body,
                },
            )
        }
    };

    if let Err(e) = contact.attach_pubkey(pubkey) {
        tracing::warn!(contact = %contact, error = %e, "pubkey does not match contact");
        return;
    }
    if let Err(e) = ctx.addresses.save(&contact) {
        tracing::warn!(contact = %contact, error = %e, "failed to save contact");
        return;
    }
    tracing::info!(contact = %contact, "pubkey received");
    flush_pending(ctx, &contact).await;
}

/// Sends every message that was waiting for this contact's pubkey.
async fn flush_pending(ctx: &Arc<Context>, contact: &bitmsg_protocol::address::BitmessageAddress) {
    let waiting = ctx
        .messages
        .find_by_status_and_recipient(MessageStatus::PubkeyRequested, contact);
    if waiting.is_empty() {
        return;
    }
    tracing::info!(contact = %contact, count = waiting.len(), "sending queued messages");
    for mut message in waiting {
        message.to = Some(contact.clone());
        if let Err(e) = ctx.send_msg(message).await {
            tracing::warn!(contact = %contact, error = %e, "queued message failed");
        }
    }
}

// ---------------------------------------------------------------------------
// msg
// ---------------------------------------------------------------------------

fn handle_msg(ctx: &Arc<Context>, object: &ObjectMessage) {
    let ObjectPayload::Msg(encrypted) = &object.payload else {
        return;
    };
    // Acknowledgement check: the recipient of one of our messages
    // floods the ack payload back as an object of its own.
    if acknowledge(ctx, &encrypted.encrypted.to_bytes()) {
        return;
    }

    for identity in ctx.addresses.identities() {
        let Some(private_key) = identity.private_key() else {
            continue;
        };
        let mut plaintext = match encrypted.decrypt(private_key.private_encryption_key()) {
            Ok(plaintext) => plaintext,
            // Not addressed to this identity.
            Err(BmError::DecryptionFailed) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "msg decrypted but unparseable");
                continue;
            }
        };
        if !object.verify_plaintext_signature(&plaintext) {
            tracing::warn!(
                iv = %object.inventory_vector(),
                "msg decrypted but signature check failed, ignoring"
            );
            return;
        }
        plaintext.to = Some(identity);
        deliver(ctx, object, plaintext, &[LabelType::Inbox, LabelType::Unread]);
        return;
    }
}

// ---------------------------------------------------------------------------
// broadcast
// ---------------------------------------------------------------------------

fn handle_broadcast(ctx: &Arc<Context>, object: &ObjectMessage) {
    let ObjectPayload::Broadcast(broadcast) = &object.payload else {
        return;
    };
    for subscription in ctx.addresses.subscriptions() {
        // v5 broadcasts name their sender by tag; v4 broadcasts can
        // only be tried against subscriptions of matching vintage.
        match broadcast {
            BroadcastPayload::V5 { tag, .. } => {
                if subscription.version() < 4 || tag != subscription.tag() {
                    continue;
                }
            }
            BroadcastPayload::V4 { .. } => {
                if subscription.version() >= 4 {
                    continue;
                }
            }
        }
        let plaintext = match broadcast.decrypt(subscription.public_decryption_key()) {
            Ok(plaintext) => plaintext,
            Err(BmError::DecryptionFailed) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "broadcast decrypted but unparseable");
                continue;
            }
        };
        if !object.verify_plaintext_signature(&plaintext) {
            tracing::warn!(
                iv = %object.inventory_vector(),
                "broadcast decrypted but signature check failed, ignoring"
            );
            continue;
        }
        deliver(
            ctx,
            object,
            plaintext,
            &[LabelType::Inbox, LabelType::Broadcast, LabelType::Unread],
        );
    }
}

// ---------------------------------------------------------------------------
// Unknown types
// ---------------------------------------------------------------------------

fn handle_generic(ctx: &Arc<Context>, object: &ObjectMessage) {
    // Unknown objects are never delivered, but one of them may be the
    // acknowledgement payload of a message we sent.
    if let ObjectPayload::Generic(data) = &object.payload {
        acknowledge(ctx, data);
    }
}

// ---------------------------------------------------------------------------
// Shared tails
// ---------------------------------------------------------------------------

/// Marks the matching outbound message acknowledged, if any.
fn acknowledge(ctx: &Arc<Context>, candidate: &[u8]) -> bool {
    let Some(mut message) = ctx.messages.find_by_ack_data(candidate) else {
        return false;
    };
    message.status = MessageStatus::AckReceived;
    if let Err(e) = ctx.messages.save(&mut message) {
        tracing::warn!(error = %e, "failed to record acknowledgement");
        return true;
    }
    tracing::info!(id = ?message.id, "message acknowledged");
    ctx.callback.message_acknowledged(&message);
    true
}

/// Stores a verified inbound plaintext, labels it, remembers the
/// sender's embedded pubkey, and notifies the listener.
fn deliver(ctx: &Arc<Context>, object: &ObjectMessage, mut plaintext: Plaintext, labels: &[LabelType]) {
    plaintext.status = MessageStatus::Received;
    plaintext.labels = ctx.messages.labels(labels);
    plaintext.iv = Some(object.inventory_vector());
    if let Err(e) = ctx.messages.save(&mut plaintext) {
        tracing::warn!(error = %e, "failed to store received message");
        return;
    }
    // The embedded pubkey is knowledge worth keeping: it spares a
    // getpubkey round-trip when replying.
    if ctx.addresses.find_identity(&plaintext.from.ripe()[..]).is_none() {
        if let Err(e) = ctx.addresses.save(&plaintext.from) {
            tracing::debug!(error = %e, "failed to save sender contact");
        }
    }
    tracing::info!(
        from = %plaintext.from,
        iv = %object.inventory_vector(),
        "message delivered"
    );
    ctx.listener.receive(&plaintext);
}
