//! Legacy signature-operation accounting for transactions and bricks

use crate::script::{LegacyScriptAnalyzer, ScriptAnalyzer};
use crate::types::*;

/// Tallies signature operations by delegating per-script counting to a
/// `ScriptAnalyzer`. The `accurate` flag is passed through untouched.
#[derive(Debug, Clone, Default)]
pub struct SigOpCounter<A = LegacyScriptAnalyzer> {
    analyzer: A,
}

impl<A: ScriptAnalyzer> SigOpCounter<A> {
    pub fn new(analyzer: A) -> Self {
        Self { analyzer }
    }

    /// SigOps(tx) = Σ SigOps(out.script_pubkey) + Σ SigOps(in.script_sig)
    pub fn count_transaction(&self, tx: &Transaction, accurate: bool) -> u64 {
        let outputs: u64 = tx
            .outputs
            .iter()
            .map(|output| self.analyzer.sig_op_count(&output.script_pubkey, accurate) as u64)
            .sum();
        // scriptSig bytes are analysed as a script whatever they contain
        let inputs: u64 = tx
            .inputs
            .iter()
            .map(|input| self.analyzer.sig_op_count(&input.script_sig, accurate) as u64)
            .sum();
        outputs + inputs
    }

    /// SigOps(brick) = Σ SigOps(tx) over all contained transactions
    pub fn count_brick(&self, brick: &Brick, accurate: bool) -> u64 {
        brick
            .transactions
            .iter()
            .map(|tx| self.count_transaction(tx, accurate))
            .sum()
    }
}

/// Legacy sigop count of a transaction using the built-in analyzer
pub fn get_legacy_sigop_count_tx(tx: &Transaction, accurate: bool) -> u64 {
    SigOpCounter::<LegacyScriptAnalyzer>::default().count_transaction(tx, accurate)
}

/// Legacy sigop count of a brick using the built-in analyzer
pub fn get_legacy_sigop_count_brick(brick: &Brick, accurate: bool) -> u64 {
    SigOpCounter::<LegacyScriptAnalyzer>::default().count_brick(brick, accurate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::*;
    use std::cell::RefCell;

    fn tx_with_scripts(script_sig: ByteString, script_pubkey: ByteString) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: OutPoint { hash: [1; 32], index: 0 },
                script_sig,
                sequence: 0xffffffff,
                witness: vec![],
            }],
            outputs: vec![TransactionOutput { value: 0, script_pubkey }],
            lock_time: 0,
        }
    }

    #[test]
    fn test_empty_transaction_has_no_sigops() {
        let tx = Transaction { version: 1, inputs: vec![], outputs: vec![], lock_time: 0 };
        assert_eq!(get_legacy_sigop_count_tx(&tx, true), 0);
        assert_eq!(get_legacy_sigop_count_tx(&tx, false), 0);
    }

    #[test]
    fn test_counts_inputs_and_outputs() {
        let tx = tx_with_scripts(vec![OP_CHECKSIG], vec![OP_CHECKSIG, OP_CHECKSIGVERIFY]);
        assert_eq!(get_legacy_sigop_count_tx(&tx, true), 3);
    }

    #[test]
    fn test_brick_sums_transactions() {
        let tx = tx_with_scripts(vec![], vec![OP_1 + 1, OP_CHECKMULTISIG]);
        let brick = Brick {
            header: BrickHeader {
                version: 1,
                prev_brick_hash: [0; 32],
                merkle_root: [0; 32],
                timestamp: 0,
                bits: 0x207fffff,
                nonce: 0,
            },
            transactions: vec![tx.clone(), tx],
        };
        assert_eq!(get_legacy_sigop_count_brick(&brick, true), 4);
        assert_eq!(get_legacy_sigop_count_brick(&brick, false), 40);
    }

    struct RecordingAnalyzer {
        seen: RefCell<Vec<bool>>,
    }

    impl ScriptAnalyzer for RecordingAnalyzer {
        fn sig_op_count(&self, _script: &[u8], accurate: bool) -> u32 {
            self.seen.borrow_mut().push(accurate);
            7
        }
    }

    #[test]
    fn test_accurate_flag_forwarded_verbatim() {
        let counter = SigOpCounter::new(RecordingAnalyzer { seen: RefCell::new(vec![]) });
        let tx = tx_with_scripts(vec![], vec![]);
        assert_eq!(counter.count_transaction(&tx, false), 14);
        assert_eq!(*counter.analyzer.seen.borrow(), vec![false, false]);
    }
}
