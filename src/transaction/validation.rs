/// Signing and signature checks for transactions
use crate::crypto::{verify_hex_signature, KeyPair};
use crate::error::ChainError;
use crate::transaction::types::Transaction;

impl Transaction {
    /// Checks the signature against the sender identity. Any malformed key or
    /// signature is reported as `InvalidSignature`.
    pub fn validate_signature(&self) -> Result<(), ChainError> {
        verify_hex_signature(&self.sender, &self.signable_message(), &self.signature)
            .map_err(|e| ChainError::InvalidSignature(e.to_string()))
    }
}

/// Signs the transaction fields with `keys` and returns the hex signature.
pub fn sign_transaction(
    keys: &KeyPair,
    sender: &str,
    recipient: &str,
    amount: u64,
    product_name: &str,
    price: u64,
) -> Result<String, ChainError> {
    let message = Transaction::signable_message_for(sender, recipient, amount, product_name, price);
    let signature = keys.sign(&message)?;
    Ok(hex::encode(signature))
}

/// Builds a transaction from `keys` to `recipient` and signs it.
pub fn signed_transaction(
    keys: &KeyPair,
    recipient: &str,
    amount: u64,
    product_name: &str,
    price: u64,
) -> Result<Transaction, ChainError> {
    let sender = keys.identity();
    let signature = sign_transaction(keys, &sender, recipient, amount, product_name, price)?;
    Ok(Transaction::new(
        sender,
        recipient,
        signature,
        amount,
        product_name,
        price,
    ))
}
