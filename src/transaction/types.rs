/// Transaction types for Stockchain
use serde::{Deserialize, Serialize};

/// A transfer of `amount` units of `product_name` from `sender` to `recipient`.
///
/// Identities are hex-encoded compressed public keys and the signature is the
/// hex-encoded compact ECDSA signature over [`Transaction::signable_message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub recipient: String,
    pub signature: String,
    pub amount: u64,
    pub product_name: String,
    pub price: u64,
}

impl Transaction {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        signature: impl Into<String>,
        amount: u64,
        product_name: impl Into<String>,
        price: u64,
    ) -> Self {
        Transaction {
            sender: sender.into(),
            recipient: recipient.into(),
            signature: signature.into(),
            amount,
            product_name: product_name.into(),
            price,
        }
    }

    /// The byte string a sender signs: sender, recipient, amount, product and
    /// price concatenated in that order, numbers in decimal.
    pub fn signable_message_for(
        sender: &str,
        recipient: &str,
        amount: u64,
        product_name: &str,
        price: u64,
    ) -> Vec<u8> {
        format!("{}{}{}{}{}", sender, recipient, amount, product_name, price).into_bytes()
    }

    pub fn signable_message(&self) -> Vec<u8> {
        Self::signable_message_for(
            &self.sender,
            &self.recipient,
            self.amount,
            &self.product_name,
            self.price,
        )
    }

    /// Field equality without the signature. Used to drop pool entries that a
    /// peer block already committed.
    pub fn is_equivalent(&self, other: &Transaction) -> bool {
        self.sender == other.sender
            && self.recipient == other.recipient
            && self.amount == other.amount
            && self.product_name == other.product_name
            && self.price == other.price
    }
}
