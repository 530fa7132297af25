//! Extensions compiled into this binary. A package resolves to one of these
//! through its manifest `entry` (or its code when `entry` is absent).

use std::sync::Arc;

use log::info;
use panel_ext_core::extension::surface::ScheduleRegistrar;
use panel_ext_core::{
    BootContext, CommandDecl, ConfigField, Extension, ExtensionBase, ExtensionError, FactoryTable,
    Manifest, PaymentMethod, RouteDecl,
};
use serde_json::{json, Map, Value};

/// Records successful logins.
struct LoginAudit {
    base: ExtensionBase,
}

impl Extension for LoginAudit {
    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn boot(&self, ctx: &mut BootContext<'_>) -> Result<(), ExtensionError> {
        let code = self.code().to_string();
        ctx.hooks().register("user.login.after", move |args| {
            let user = args.first().cloned().unwrap_or(Value::Null);
            info!("event=login_audit module=core status=ok code={code} user={user}");
            Ok(())
        });
        Ok(())
    }

    fn schedule(&self, schedule: &mut ScheduleRegistrar<'_>) {
        let cron = self
            .base
            .get("prune_cron")
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "0 4 * * *".to_string());
        schedule.job("prune_login_audit", &cron);
    }

    fn commands(&self) -> Vec<CommandDecl> {
        vec![CommandDecl {
            name: "login-audit:prune".to_string(),
            description: "Drop audit entries older than the retention window".to_string(),
        }]
    }
}

/// Offline bank transfer checkout.
struct ManualPayment {
    base: ExtensionBase,
}

impl PaymentMethod for ManualPayment {
    fn label(&self) -> String {
        self.base
            .get("label")
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "Bank transfer".to_string())
    }

    fn form(&self) -> Vec<(String, ConfigField)> {
        let mut meta = Map::new();
        meta.insert("label".to_string(), json!("IBAN shown to the customer"));
        vec![(
            "iban".to_string(),
            ConfigField {
                default: json!(""),
                meta,
            },
        )]
    }
}

impl Extension for ManualPayment {
    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn routes(&self) -> Vec<RouteDecl> {
        vec![RouteDecl::new("post", "/payment/manual/notify", "manual_payment.notify")]
    }

    fn as_payment(&self) -> Option<&dyn PaymentMethod> {
        Some(self)
    }
}

pub fn factories() -> FactoryTable {
    FactoryTable::new()
        .with("login_audit", |manifest: &Manifest| {
            Arc::new(LoginAudit {
                base: ExtensionBase::from_manifest(manifest),
            }) as Arc<dyn Extension>
        })
        .with("manual_payment", |manifest: &Manifest| {
            Arc::new(ManualPayment {
                base: ExtensionBase::from_manifest(manifest),
            }) as Arc<dyn Extension>
        })
}
