/*!
# NodeGrid DevKit - Stubs et utilitaires pour les tests

Bibliothèque facilitant les tests du kernel sans message log réel :
- Mock du message log (lecture filtrée, soumissions enregistrées)
- Construction de records INSTANCE / FORGET / POST
- Fixtures JSON de batches
- Harness avec assertions sur les soumissions
*/

pub mod log_stub;
pub mod record_helpers;
pub mod test_utils;

pub use log_stub::{MockMessageLog, Submission};
pub use record_helpers::{FixtureLoader, RecordBuilder, FIXTURE_WALLET};
pub use test_utils::TestHarness;
