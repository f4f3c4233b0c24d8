//! Typed access to per-case documents
//!
//! Collection names are fixed here and nowhere else. Orchestrators never
//! touch the raw store directly.

use keirloom_store::{get_doc, list_docs, set_doc, CaseStore};

use crate::error::{codes, ExecError, Result};
use crate::model::{
    ApprovalTx, DistributionItem, DistributionState, LockItem, LockState, SignerListState,
    SignerSignature,
};
use crate::records::{AssetRecord, CaseRecord, HeirRecord, PlanRecord};

mod col {
    pub const CASE: &str = "case";
    pub const PLANS: &str = "plans";
    pub const HEIRS: &str = "heirs";
    pub const ASSETS: &str = "assets";
    pub const LOCK: &str = "lock";
    pub const LOCK_ITEMS: &str = "lock_items";
    pub const APPROVAL: &str = "approval";
    pub const SIGNATURES: &str = "approval_signatures";
    pub const DISTRIBUTION: &str = "distribution";
    pub const DIST_ITEMS: &str = "distribution_items";
}

pub struct CaseRepo<'a> {
    store: &'a dyn CaseStore,
}

impl<'a> CaseRepo<'a> {
    pub fn new(store: &'a dyn CaseStore) -> Self {
        Self { store }
    }

    pub fn case(&self, case_id: &str) -> Result<CaseRecord> {
        get_doc(self.store, case_id, col::CASE, "record")?.ok_or_else(|| {
            ExecError::precondition(
                codes::CASE_NOT_FOUND,
                format!("case {case_id} does not exist"),
            )
        })
    }

    pub fn put_case(&self, record: &CaseRecord) -> Result<()> {
        set_doc(self.store, &record.case_id, col::CASE, "record", record)?;
        Ok(())
    }

    pub fn plans(&self, case_id: &str) -> Result<Vec<PlanRecord>> {
        Ok(list_docs(self.store, case_id, col::PLANS)?)
    }

    pub fn put_plan(&self, plan: &PlanRecord) -> Result<()> {
        set_doc(self.store, &plan.case_id, col::PLANS, &plan.plan_id, plan)?;
        Ok(())
    }

    pub fn heir(&self, case_id: &str, uid: &str) -> Result<Option<HeirRecord>> {
        Ok(get_doc(self.store, case_id, col::HEIRS, uid)?)
    }

    pub fn put_heir(&self, case_id: &str, heir: &HeirRecord) -> Result<()> {
        set_doc(self.store, case_id, col::HEIRS, &heir.uid, heir)?;
        Ok(())
    }

    pub fn assets(&self, case_id: &str) -> Result<Vec<AssetRecord>> {
        Ok(list_docs(self.store, case_id, col::ASSETS)?)
    }

    pub fn put_asset(&self, case_id: &str, asset: &AssetRecord) -> Result<()> {
        set_doc(self.store, case_id, col::ASSETS, &asset.asset_id, asset)?;
        Ok(())
    }

    pub fn lock_state(&self, case_id: &str) -> Result<Option<LockState>> {
        Ok(get_doc(self.store, case_id, col::LOCK, "state")?)
    }

    pub fn put_lock_state(&self, case_id: &str, state: &LockState) -> Result<()> {
        set_doc(self.store, case_id, col::LOCK, "state", state)?;
        Ok(())
    }

    pub fn lock_items(&self, case_id: &str) -> Result<Vec<LockItem>> {
        Ok(list_docs(self.store, case_id, col::LOCK_ITEMS)?)
    }

    pub fn put_lock_item(&self, case_id: &str, item: &LockItem) -> Result<()> {
        set_doc(self.store, case_id, col::LOCK_ITEMS, &item.item_id, item)?;
        Ok(())
    }

    pub fn clear_lock_items(&self, case_id: &str) -> Result<()> {
        self.store.delete_all(case_id, col::LOCK_ITEMS)?;
        Ok(())
    }

    pub fn signer_list(&self, case_id: &str) -> Result<Option<SignerListState>> {
        Ok(get_doc(self.store, case_id, col::APPROVAL, "signer_list")?)
    }

    pub fn put_signer_list(&self, case_id: &str, list: &SignerListState) -> Result<()> {
        set_doc(self.store, case_id, col::APPROVAL, "signer_list", list)?;
        Ok(())
    }

    pub fn approval_tx(&self, case_id: &str) -> Result<Option<ApprovalTx>> {
        Ok(get_doc(self.store, case_id, col::APPROVAL, "tx")?)
    }

    pub fn put_approval_tx(&self, case_id: &str, tx: &ApprovalTx) -> Result<()> {
        set_doc(self.store, case_id, col::APPROVAL, "tx", tx)?;
        Ok(())
    }

    pub fn signatures(&self, case_id: &str) -> Result<Vec<SignerSignature>> {
        Ok(list_docs(self.store, case_id, col::SIGNATURES)?)
    }

    pub fn put_signature(&self, case_id: &str, signature: &SignerSignature) -> Result<()> {
        set_doc(
            self.store,
            case_id,
            col::SIGNATURES,
            &signature.uid,
            signature,
        )?;
        Ok(())
    }

    pub fn clear_signatures(&self, case_id: &str) -> Result<()> {
        self.store.delete_all(case_id, col::SIGNATURES)?;
        Ok(())
    }

    pub fn distribution_state(&self, case_id: &str) -> Result<Option<DistributionState>> {
        Ok(get_doc(self.store, case_id, col::DISTRIBUTION, "state")?)
    }

    pub fn put_distribution_state(&self, case_id: &str, state: &DistributionState) -> Result<()> {
        set_doc(self.store, case_id, col::DISTRIBUTION, "state", state)?;
        Ok(())
    }

    pub fn distribution_items(&self, case_id: &str) -> Result<Vec<DistributionItem>> {
        Ok(list_docs(self.store, case_id, col::DIST_ITEMS)?)
    }

    pub fn distribution_item(
        &self,
        case_id: &str,
        item_id: &str,
    ) -> Result<Option<DistributionItem>> {
        Ok(get_doc(self.store, case_id, col::DIST_ITEMS, item_id)?)
    }

    pub fn put_distribution_item(&self, case_id: &str, item: &DistributionItem) -> Result<()> {
        set_doc(self.store, case_id, col::DIST_ITEMS, &item.item_id, item)?;
        Ok(())
    }
}
