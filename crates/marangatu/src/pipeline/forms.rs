//! Declared form types.
//!
//! Pure data: each [`FormDefinition`] lists the steps the interpreter runs.
//! Tax forms are keyed by their form number and run for a fiscal period;
//! profile updates are keyed by the normalized link text and run against the
//! link the portal supplied.

use super::capture::Source;
use super::envelope::Rule;
use super::merge::VAT_POLICY;
use super::{Body, Param, Root, Step, Target};
use crate::types::FormContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    TaxForm,
    ProfileUpdate,
}

#[derive(Debug)]
pub struct FormDefinition {
    /// Form number (`"211"`) or profile handler key.
    pub id: &'static str,
    pub kind: FormKind,
    pub title: &'static str,
    pub steps: &'static [Step],
    /// Notified on success; `{period}` is replaced by the fiscal period.
    pub success: &'static str,
}

impl FormDefinition {
    pub fn success_message(&self, ctx: &FormContext) -> String {
        self.success.replace("{period}", ctx.period().unwrap_or_default())
    }
}

/// Economic activity declared on the income-share update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EconomicActivity {
    /// Activity code as the registry form names it, e.g. `C4_96099`.
    pub code: String,
    /// Display name, `"<number> - <description>"`.
    pub name: String,
    /// Percentage of income.
    pub share: u32,
}

impl Default for EconomicActivity {
    fn default() -> Self {
        Self {
            code: "C4_96099".into(),
            name: "96099 - OTRAS ACTIVIDADES DE SERVICIOS PERSONALES N.C.P.".into(),
            share: 100,
        }
    }
}

/// Business values the profile-update forms submit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormSettings {
    pub activity: EconomicActivity,
}

const RECOVER_PATH: &str = "actualizacion/recuperar";
const SAVE_PATH: &str = "actualizacion/guardar?";
const ACCEPT_DOCUMENT_PATH: &str = "ru/documento/archivos/aceptarDocumento";
const DOCUMENT_CONTROLLER: &str = "DocumentoArchivosController";

pub static VAT: FormDefinition = FormDefinition {
    id: "211",
    kind: FormKind::TaxForm,
    title: "VAT declaration",
    steps: &[
        Step::Fetch {
            label: "Preparing tax form",
            target: Target::Menu {
                code: "SG00005",
                missing: "Tax payer menu not found",
            },
        },
        Step::ExpectMarker {
            marker: "Presentar Declaración",
            reason: "Tax payer not found",
        },
        Step::Token(&[
            ("ruc", Param::Ruc),
            ("dv", Param::Dv),
            ("periodo", Param::Period),
            ("impuesto", Param::Str("211")),
            ("formulario", Param::Str("120")),
            ("fechaDiferida", Param::Null),
        ]),
        Step::Fetch {
            label: "Retrieving tax form",
            target: Target::Tokenized("declaracion/permite"),
        },
        Step::ParseJson {
            label: "checking form permission",
        },
        Step::Check {
            field: "permite",
            rule: Rule::Truthy,
            fallback: "Tax form could not be retrieved",
        },
        Step::Follow {
            field: "url",
            root: Root::Host,
            required: true,
        },
        Step::MergeInputs {
            policy: &VAT_POLICY,
            cyp_from: "url",
        },
        Step::Post {
            label: "Sending tax form",
            target: Target::Endpoint("presentar"),
            body: Body::Submission,
        },
        Step::ParseJson {
            label: "filing VAT",
        },
        Step::Check {
            field: "exito",
            rule: Rule::Truthy,
            fallback: "No response received when filing VAT. Try again later.",
        },
    ],
    success: "VAT filed successfully!",
};

pub static RECEIPTS: FormDefinition = FormDefinition {
    id: "955",
    kind: FormKind::TaxForm,
    title: "receipt summary",
    steps: &[
        Step::Fetch {
            label: "Preparing receipt management",
            target: Target::Menu {
                code: "DI03100",
                missing: "Receipt management menu not found",
            },
        },
        Step::ExpectMarker {
            marker: "Gestión de Comprobantes",
            reason: "Not able to manage receipts",
        },
        Step::Token(&[("ruc", Param::Ruc)]),
        Step::Fetch {
            label: "Getting access to receipt forms",
            target: Target::Tokenized("gdi/di/gestion/listarTiposOperaciones"),
        },
        Step::ParseJson {
            label: "getting operations",
        },
        Step::SelectFromArray {
            key: "id",
            equals: "6",
            field: "url",
            var: "operation",
            missing: "No access to receipt forms",
        },
        Step::Fetch {
            label: "Retrieving receipt forms",
            target: Target::Var {
                var: "operation",
                root: Root::Base,
            },
        },
        Step::ExpectMarker {
            marker: "Registro de Comprobantes - Presentación de Talón",
            reason: "No receipt forms available",
        },
        Step::Token(&[
            ("periodo", Param::PeriodInt),
            ("formulario", Param::Int(241)),
        ]),
        Step::Post {
            label: "Sending tax form 241",
            target: Target::Tokenized("gdi/di/talonresumen/procesarTalon"),
            body: Body::Empty,
        },
        Step::ParseJson {
            label: "filing receipt form 241",
        },
        Step::Check {
            field: "exito",
            rule: Rule::Present,
            fallback: "Filing receipt form 241",
        },
    ],
    success: "Receipts for period {period} filed successfully!",
};

/// Registry record fields submitted with the first validation step.
const REGISTRY_CAPTURE: &[(&str, Source)] = &[
    ("formaJuridica", Source::Const("FISICO")),
    ("ruc", Source::Ruc),
    ("categoria", Source::Const("EDICION")),
    ("generalesFormaJuridica", Source::Const("FISICO")),
    ("generalesFechaSolicitud", Source::Today),
    ("generalesTipoInscripcion", Source::Const("SOLICITADA")),
    ("categoriaContribuyente", Source::Const("PEQUENO")),
    ("generalesTipoDocumento", Source::General("generalesTipoDocumento")),
    ("operacionesMesCierreVigente", Source::GeneralRaw("operacionesMesCierreHistorico")),
    ("nombreCompleto", Source::General("nombreCompleto")),
    ("generalesPaisDocumento", Source::Const("PY")),
    ("operacionesMesCierre", Source::GeneralRaw("operacionesMesCierreHistorico")),
    ("ley285", Source::General("ley285")),
    ("generalesPaisDocumento_", Source::Const("Paraguay")),
    ("generalesDv", Source::Dv),
    ("generalesNumeroDocumento", Source::Ruc),
    ("declaraInternet", Source::General("declaraInternet")),
    ("operacionesImportador", Source::General("operacionesImportador")),
    ("generalesNombres", Source::General("generalesNombres")),
    ("generalesCorreo01", Source::General("generalesCorreo01")),
    ("operacionesFechaInicio", Source::General("operacionesFechaInicio")),
    ("operacionesExportador", Source::General("operacionesExportador")),
    ("tipoInscripcion", Source::Const("SOLICITADA")),
    ("generalesApellido01", Source::General("generalesApellido01")),
    ("operacionesFuncionarios", Source::GeneralRaw("operacionesFuncionarios")),
    ("generalesEstado", Source::General("generalesEstado")),
    ("generalesRuc", Source::Ruc),
    ("generalesRegionalTexto", Source::General("generalesRegionalTexto")),
    ("fechaInicioActividad", Source::General("operacionesFechaInicio")),
    ("generalesRegional", Source::GeneralRaw("generalesRegional")),
    ("generalesTipoDocumento_", Source::General("generalesTipoDocumento")),
    ("operacionesMesCierre_", Source::Const("DICIEMBRE")),
    ("generalesCiudadanoActualizado", Source::General("generalesCiudadanoActualizado")),
    ("operacionesMesCierreHistorico", Source::GeneralRaw("operacionesMesCierreHistorico")),
    ("generalesNombreCompleto", Source::General("generalesNombreCompleto")),
    ("generalesFechaNacimiento", Source::General("generalesFechaNacimiento")),
    ("domicilioTipoVia", Source::Domicile("domicilioTipoVia")),
    ("domicilioCelular01Sufijo", Source::Domicile("domicilioCelular01Sufijo")),
    ("domicilioReferencias", Source::Domicile("domicilioReferencias")),
    ("domicilioCelular01Prefijo", Source::Domicile("domicilioCelular01Prefijo")),
    ("domicilioCelular01", Source::Mobile),
    ("domicilioDistrito_", Source::Domicile("domicilioDistrito_")),
    ("domicilioLatitud", Source::Domicile("domicilioLatitud")),
    ("domicilioDepartamento_", Source::Domicile("domicilioDepartamento_")),
    ("domicilioBarrio_", Source::Domicile("domicilioBarrio_")),
    ("domicilioTipoVia_", Source::Domicile("domicilioTipoVia")),
    ("domicilioNombreVia", Source::Domicile("domicilioNombreVia")),
    ("domicilioTipoInmueble", Source::Domicile("domicilioTipoInmueble")),
    ("domicilioNumeroPuerta", Source::Domicile("domicilioNumeroPuerta")),
    ("domicilioTipoInmueble_", Source::Domicile("domicilioTipoInmueble")),
    ("domicilioLongitud", Source::Domicile("domicilioLongitud")),
    ("domicilioLocalidad", Source::DomicileRaw("domicilioLocalidad")),
    ("domicilioLocalidad_", Source::Domicile("domicilioDistrito_")),
    ("domicilioDepartamento", Source::Int(1)),
    ("domicilioBarrio", Source::DomicileRaw("domicilioBarrio")),
    ("domicilioDistrito", Source::DomicileRaw("domicilioLocalidad")),
];

/// Added once the first step validated.
const REGISTRY_ADDRESS_EDIT: &[(&str, Source)] = &[
    ("domicilioTelefono02Prefijo", Source::Const("")),
    ("domicilioCelular02Prefijo", Source::Const("")),
    ("domicilioCelular02", Source::Const("")),
    ("domicilioTelefono02", Source::Const("")),
    ("domicilioCelular02Sufijo", Source::Const("")),
    ("domicilioTelefono02Sufijo", Source::Const("")),
    ("domicilioFechaModificacion", Source::Today),
    ("edicionDomicilio", Source::Const("S")),
    ("domicilioLat", Source::DomicileRaw("domicilioLatitud")),
    ("domicilioLng", Source::DomicileRaw("domicilioLongitud")),
];

const REGISTRY_ENVELOPE: &[(&str, Param)] = &[
    ("ruc", Param::Ruc),
    ("categoria", Param::Str("EDICION")),
    ("captura", Param::Capture),
];

pub static REGISTRY_UPDATE: FormDefinition = FormDefinition {
    id: "registro_de_contribuyentes",
    kind: FormKind::ProfileUpdate,
    title: "taxpayer registry update",
    steps: &[
        Step::Fetch {
            label: "Retrieving taxpayer data",
            target: Target::Link,
        },
        Step::ExpectMarker {
            marker: "Actualización de Contribuyente",
            reason: "No profile available",
        },
        Step::Token(&[("ruc", Param::Ruc), ("categoria", Param::Str("EDICION"))]),
        Step::Fetch {
            label: "Retrieving form data",
            target: Target::Tokenized(RECOVER_PATH),
        },
        Step::ParseJson {
            label: "recovering data",
        },
        Step::BuildCapture(REGISTRY_CAPTURE),
        Step::Post {
            label: "Checking step",
            target: Target::Endpoint("actualizacion/verificarPaso"),
            body: Body::Object(&[
                ("ruc", Param::Ruc),
                ("categoria", Param::Str("EDICION")),
                ("paso", Param::Str("generales")),
                ("captura", Param::Capture),
            ]),
        },
        Step::ExpectEmptyArray,
        Step::ExtendCapture(REGISTRY_ADDRESS_EDIT),
        Step::Post {
            label: "Verifying data",
            target: Target::Endpoint("actualizacion/verificar"),
            body: Body::Object(REGISTRY_ENVELOPE),
        },
        Step::ExpectEmptyArray,
        Step::Post {
            label: "Saving tax payer data",
            target: Target::Endpoint(SAVE_PATH),
            body: Body::Object(REGISTRY_ENVELOPE),
        },
        Step::ParseJson {
            label: "saving data",
        },
        Step::Check {
            field: "exito",
            rule: Rule::NotFalse,
            fallback: "Unknown error saving data",
        },
        Step::Follow {
            field: "url",
            root: Root::Base,
            required: true,
        },
        Step::ExpectMarker {
            marker: "Enviar Solicitud",
            reason: "Can't update tax payer info",
        },
        Step::ExtractDocumentId {
            controller: DOCUMENT_CONTROLLER,
            var: "document",
        },
        Step::Post {
            label: "Confirming document",
            target: Target::Endpoint(ACCEPT_DOCUMENT_PATH),
            body: Body::Object(&[("id", Param::Var("document"))]),
        },
        Step::Follow {
            field: "url",
            root: Root::Base,
            required: false,
        },
    ],
    success: "Tax payer info updated successfully!",
};

const ACTIVITY_CAPTURE: &[(&str, Source)] = &[
    ("formaJuridica", Source::Const("FISICO")),
    ("ruc", Source::Ruc),
    ("categoria", Source::Const("PORCENTAJES_ACTIVIDAD")),
    ("generalesFechaSolicitud", Source::Today),
    ("generalesTipoInscripcion", Source::Const("SOLICITADA")),
    ("operacionesFechaInicio", Source::General("operacionesFechaInicio")),
    ("operacionesMesCierreHistorico", Source::GeneralRaw("operacionesMesCierreHistorico")),
    ("nombreCompleto", Source::General("nombreCompleto")),
    ("generalesNombreCompleto", Source::General("generalesNombreCompleto")),
    ("edicionPorcentajes", Source::General("edicionPorcentajes")),
    ("generalesPorcentajesActividadesAnho", Source::Year),
    ("generalesPorcentajesActividadesAnho_", Source::Year),
    ("domicilioTelefono01", Source::Const("")),
    ("domicilioTelefono02", Source::Const("")),
    ("domicilioCelular01", Source::Const("")),
    ("domicilioCelular02", Source::Const("")),
    ("porcentajeActividadNombre.1", Source::ActivityName),
    ("porcentajeActividad.1", Source::ActivityCode),
    ("porcentajeActividadValor.1", Source::ActivityShare),
];

pub static ACTIVITY_SHARES: FormDefinition = FormDefinition {
    id: "porcentajes_actividades",
    kind: FormKind::ProfileUpdate,
    title: "income share by economic activity",
    steps: &[
        Step::Fetch {
            label: "Retrieving taxpayer data",
            target: Target::Link,
        },
        Step::ExpectMarker {
            marker: "Porcentajes de Ingreso por Actividades Económicas",
            reason: "No profile available",
        },
        Step::Token(&[
            ("ruc", Param::Ruc),
            ("categoria", Param::Str("PORCENTAJES_ACTIVIDAD")),
        ]),
        Step::Fetch {
            label: "Retrieving form data",
            target: Target::Tokenized(RECOVER_PATH),
        },
        Step::ParseJson {
            label: "recovering data",
        },
        Step::BuildCapture(ACTIVITY_CAPTURE),
        Step::Post {
            label: "Saving percentage data",
            target: Target::Endpoint(SAVE_PATH),
            body: Body::Object(&[
                ("ruc", Param::Ruc),
                ("categoria", Param::Str("PORCENTAJES_ACTIVIDAD")),
                ("captura", Param::Capture),
            ]),
        },
        Step::ParseJson {
            label: "saving data",
        },
        Step::Check {
            field: "exito",
            rule: Rule::NotFalse,
            fallback: "Unknown error saving data",
        },
        Step::Follow {
            field: "url",
            root: Root::Base,
            required: true,
        },
        Step::ExpectMarker {
            marker: "Enviar Solicitud",
            reason: "Can't update percentages",
        },
        Step::ExtractDocumentId {
            controller: DOCUMENT_CONTROLLER,
            var: "document",
        },
        Step::Post {
            label: "Confirming document",
            target: Target::Endpoint(ACCEPT_DOCUMENT_PATH),
            body: Body::Object(&[("id", Param::Var("document"))]),
        },
        Step::Follow {
            field: "url",
            root: Root::Base,
            required: false,
        },
    ],
    success: "Info on the percentage of income from economic activity updated successfully!",
};

static TAX_FORMS: &[&FormDefinition] = &[&VAT, &RECEIPTS];
static PROFILE_UPDATES: &[&FormDefinition] = &[&REGISTRY_UPDATE, &ACTIVITY_SHARES];

/// Tax form by number.
pub fn tax_form(id: &str) -> Option<&'static FormDefinition> {
    TAX_FORMS.iter().copied().find(|f| f.id == id)
}

/// Profile update by handler key.
pub fn profile_update(key: &str) -> Option<&'static FormDefinition> {
    PROFILE_UPDATES.iter().copied().find(|f| f.id == key)
}
