use crate::billing::{BillingAccount, BudgetTemplate, budget_id_from_name};
use crate::cloud::{ApiError, CloudApi};
use crate::config::{Config, LabelPolicy, ValidationError};
use crate::event::{
    BUDGET_ID_LABEL, BudgetAlert, LifecycleState, Notification, PROJECT_ID_LABEL, ProjectEvent,
};
use crate::metrics_defs;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Immutable settings fixed at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub billing_account: BillingAccount,
    pub budget: BudgetTemplate,
    pub label_policy: LabelPolicy,
    pub fixed_labels: BTreeMap<String, String>,
}

impl Settings {
    pub fn from_config(config: &Config) -> Result<Self, ValidationError> {
        config.validate()?;

        Ok(Settings {
            billing_account: BillingAccount::parse(&config.billing_account)?,
            budget: config.budget.template(),
            label_policy: config.labels.policy,
            fixed_labels: config.labels.fixed.clone(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    /// The project already carries a budget-id label.
    AlreadyProvisioned,
    /// The project is pending deletion but no budget was ever linked to it.
    NoBudgetToDelete,
    IgnoredState(LifecycleState),
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyProvisioned => "already_provisioned",
            SkipReason::NoBudgetToDelete => "no_budget_to_delete",
            SkipReason::IgnoredState(_) => "ignored_state",
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Action<'a> {
    Provision,
    Teardown { budget_id: &'a str },
    Skip(SkipReason),
}

/// Choose what to do for a project event.
///
/// At most one of provision and teardown applies. The budget-id label is what
/// stops the label update made by provisioning from provisioning again when
/// its own change notification arrives.
pub fn decide(event: &ProjectEvent) -> Action<'_> {
    match (&event.lifecycle_state, event.budget_id()) {
        (LifecycleState::Active, _) if event.has_budget_label() => {
            Action::Skip(SkipReason::AlreadyProvisioned)
        }
        (LifecycleState::Active, _) => Action::Provision,
        (LifecycleState::DeleteRequested, Some(budget_id)) => Action::Teardown { budget_id },
        (LifecycleState::DeleteRequested, None) => Action::Skip(SkipReason::NoBudgetToDelete),
        (state @ LifecycleState::Other(_), _) => {
            Action::Skip(SkipReason::IgnoredState(state.clone()))
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Provisioned {
        budget_name: String,
        budget_id: String,
    },
    TornDown {
        budget_name: String,
    },
    Skipped(SkipReason),
    BudgetAlert,
}

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error("could not obtain API credentials: {0}")]
    Authorization(#[source] ApiError),
    #[error("could not assign billing account to project {project_id}: {source}")]
    BillingAssignment {
        project_id: String,
        #[source]
        source: ApiError,
    },
    #[error("could not create budget for project {project_id}: {source}")]
    BudgetCreation {
        project_id: String,
        #[source]
        source: ApiError,
    },
    #[error("budget name {0} has no budget id")]
    MalformedBudgetName(String),
    #[error("could not update labels of project {project_id}: {source}")]
    LabelUpdate {
        project_id: String,
        #[source]
        source: ApiError,
    },
    #[error("could not delete budget {budget_name}: {source}")]
    BudgetDeletion {
        budget_name: String,
        #[source]
        source: ApiError,
    },
}

impl ReconcileError {
    pub fn step(&self) -> &'static str {
        match self {
            ReconcileError::Authorization(_) => "authorization",
            ReconcileError::BillingAssignment { .. } => "billing_assignment",
            ReconcileError::BudgetCreation { .. } => "budget_creation",
            ReconcileError::MalformedBudgetName(_) => "budget_name",
            ReconcileError::LabelUpdate { .. } => "label_update",
            ReconcileError::BudgetDeletion { .. } => "budget_deletion",
        }
    }
}

/// Keeps a project's billing account, budget and labels in line with its
/// lifecycle state.
#[derive(Clone)]
pub struct ProjectLifecycleReconciler {
    settings: Arc<Settings>,
    api: Arc<dyn CloudApi + 'static>,
}

impl ProjectLifecycleReconciler {
    pub fn new(settings: Settings, api: Arc<dyn CloudApi + 'static>) -> Self {
        ProjectLifecycleReconciler {
            settings: Arc::new(settings),
            api,
        }
    }

    pub async fn handle_notification(
        &self,
        notification: Notification,
    ) -> Result<Outcome, ReconcileError> {
        match notification {
            Notification::ProjectChange(event) => self.reconcile(&event).await,
            Notification::BudgetAlert(alert) => {
                self.acknowledge_alert(&alert);
                Ok(Outcome::BudgetAlert)
            }
        }
    }

    pub async fn reconcile(&self, event: &ProjectEvent) -> Result<Outcome, ReconcileError> {
        shared::counter!(metrics_defs::EVENTS_RECEIVED).increment(1);
        let start = Instant::now();

        tracing::info!(
            project_id = %event.project_id,
            project_number = %event.project_number,
            lifecycle_state = %event.lifecycle_state,
            budget_id = event.budget_id(),
            "project change received"
        );

        let result = match decide(event) {
            Action::Provision => self.provision(event).await,
            Action::Teardown { budget_id } => self.teardown(event, budget_id).await,
            Action::Skip(reason) => {
                tracing::info!(
                    project_id = %event.project_id,
                    reason = reason.as_str(),
                    "nothing to do"
                );
                shared::counter!(metrics_defs::EVENTS_SKIPPED, "reason" => reason.as_str())
                    .increment(1);
                Ok(Outcome::Skipped(reason))
            }
        };

        shared::histogram!(metrics_defs::RECONCILE_DURATION).record(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            tracing::error!(project_id = %event.project_id, error = %e, "reconciliation failed");
            shared::counter!(metrics_defs::FAILED, "step" => e.step()).increment(1);
        }

        result
    }

    async fn session(&self) -> Result<Arc<dyn CloudApi>, ReconcileError> {
        self.api.session().await.map_err(ReconcileError::Authorization)
    }

    async fn provision(&self, event: &ProjectEvent) -> Result<Outcome, ReconcileError> {
        let project_id = event.project_id.as_str();
        let account = self.settings.billing_account.resource_name();
        let api = self.session().await?;

        api.set_billing_account(project_id, &account)
            .await
            .map_err(|source| ReconcileError::BillingAssignment {
                project_id: project_id.to_owned(),
                source,
            })?;
        tracing::info!(project_id, billing_account = %account, "billing account assigned");

        let spec = self
            .settings
            .budget
            .for_project(project_id, &event.project_number);
        let budget = api
            .create_budget(&account, &spec)
            .await
            .map_err(|source| ReconcileError::BudgetCreation {
                project_id: project_id.to_owned(),
                source,
            })?;
        tracing::info!(project_id, budget_name = %budget.name, "budget created");

        let budget_id = budget_id_from_name(&budget.name)
            .ok_or_else(|| ReconcileError::MalformedBudgetName(budget.name.clone()))?
            .to_owned();

        // Writing labels triggers another change notification for this project,
        // which is then skipped because of the budget-id label.
        self.write_labels(api.as_ref(), event, &budget_id)
            .await
            .map_err(|source| ReconcileError::LabelUpdate {
                project_id: project_id.to_owned(),
                source,
            })?;
        tracing::info!(project_id, budget_id = %budget_id, "project labeled");

        shared::counter!(metrics_defs::PROVISIONED).increment(1);
        Ok(Outcome::Provisioned {
            budget_name: budget.name,
            budget_id,
        })
    }

    async fn write_labels(
        &self,
        api: &dyn CloudApi,
        event: &ProjectEvent,
        budget_id: &str,
    ) -> Result<(), ApiError> {
        let mut project = api.get_project(&event.project_number).await?;
        let labels = self.provisioned_labels(project.labels(), &event.project_id, budget_id);
        project.set_labels(labels);

        api.update_project(&event.project_number, &project).await?;
        Ok(())
    }

    fn provisioned_labels(
        &self,
        existing: BTreeMap<String, String>,
        project_id: &str,
        budget_id: &str,
    ) -> BTreeMap<String, String> {
        let mut labels = match self.settings.label_policy {
            LabelPolicy::Merge => existing,
            LabelPolicy::Replace => {
                let discarded: Vec<&String> = existing
                    .keys()
                    .filter(|k| {
                        !self.settings.fixed_labels.contains_key(*k)
                            && k.as_str() != BUDGET_ID_LABEL
                            && k.as_str() != PROJECT_ID_LABEL
                    })
                    .collect();
                if !discarded.is_empty() {
                    tracing::warn!(
                        project_id,
                        ?discarded,
                        "replacing project labels, existing labels will be lost"
                    );
                }
                BTreeMap::new()
            }
        };

        labels.extend(self.settings.fixed_labels.clone());
        labels.insert(PROJECT_ID_LABEL.into(), project_id.into());
        labels.insert(BUDGET_ID_LABEL.into(), budget_id.into());
        labels
    }

    // Labels are left alone: projects pending deletion reject label updates.
    async fn teardown(
        &self,
        event: &ProjectEvent,
        budget_id: &str,
    ) -> Result<Outcome, ReconcileError> {
        let budget_name = self.settings.billing_account.budget_name(budget_id);
        let api = self.session().await?;

        api.delete_budget(&budget_name)
            .await
            .map_err(|source| ReconcileError::BudgetDeletion {
                budget_name: budget_name.clone(),
                source,
            })?;
        tracing::info!(project_id = %event.project_id, %budget_name, "budget deleted");

        shared::counter!(metrics_defs::TORN_DOWN).increment(1);
        Ok(Outcome::TornDown { budget_name })
    }

    fn acknowledge_alert(&self, alert: &BudgetAlert) {
        shared::counter!(metrics_defs::BUDGET_ALERTS_RECEIVED).increment(1);
        tracing::info!(
            budget = %alert.budget_display_name,
            cost = alert.cost_amount,
            budget_amount = alert.budget_amount,
            currency = %alert.currency_code,
            threshold = alert.alert_threshold_exceeded,
            "budget alert received"
        );
    }
}
