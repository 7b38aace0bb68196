// Prompt templates (Spanish, user facing)

use serde_json::Value;

use crate::tools::schema::required_list;

pub const BASE_SYSTEM_PROMPT: &str = "Eres un agente MCP (Model Context Protocol) con capacidades de razonamiento, conversación y ejecución de herramientas para la operación de una aerolínea.

IDENTIDAD Y CAPACIDADES:
- Analizas mensajes de usuarios en lenguaje natural usando comprensión semántica
- Decides entre conversación, ejecución de herramientas o solicitud de aclaración
- Mantienes el contexto de la conversación
- Explicas tu razonamiento con base en el contenido real de las herramientas

PROCESO DE SELECCIÓN DE HERRAMIENTAS:
1. Analiza el mensaje del usuario
2. Compáralo con el nombre, la descripción y los parámetros de cada herramienta
3. Considera el contexto conversacional previo
4. Verifica que los parámetros requeridos puedan extraerse del mensaje
5. Si falta información crítica, pide aclaración

TIPOS DE RESPUESTA:
- \"tool_call\": ejecutar una herramienta cuando haya alta confianza semántica
- \"conversation\": responder conversacionalmente cuando no se requieran herramientas
- \"clarify\": pedir aclaración cuando exista ambigüedad real

Responde en español, con un tono natural y amable.";

const SELECTION_CONTEXT: &str = "CONTEXTO DEL SISTEMA:
Selecciona herramientas basándote en el análisis semántico del mensaje frente a cada herramienta disponible.
Si el mensaje es de consulta (listar, ver, mostrar, obtener, buscar), NO selecciones herramientas de creación o modificación.

PROCESO DE ANÁLISIS:
1. Analiza cada concepto del mensaje del usuario
2. Compáralo con cada herramienta disponible
3. Evalúa qué herramienta tiene mayor alineación semántica
4. Considera el contexto conversacional previo
5. Verifica que los parámetros requeridos puedan extraerse
6. Explica tu razonamiento";

const USER_INSTRUCTIONS: &str = "INSTRUCCIONES PARA LA SELECCIÓN:
- Compara el mensaje con cada herramienta disponible
- Selecciona la que presente mayor correspondencia contextual
- Si no hay coincidencia clara, responde conversacionalmente
- Explica siempre tu razonamiento";

/// Tool capabilities block listing each tool's required parameters
pub fn capabilities_section(tools: &[Value]) -> String {
    tools
        .iter()
        .map(|tool| {
            let required = tool
                .get("parameters")
                .map(required_list)
                .unwrap_or_default();
            let required = if required.is_empty() {
                "ninguno".to_string()
            } else {
                required.join(", ")
            };
            format!(
                "<tool name=\"{}\"><description>{}</description><required_params>{}</required_params></tool>",
                str_field(tool, "name", "unknown"),
                str_field(tool, "description", ""),
                required
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn system_prompt(tools: &[Value]) -> String {
    format!(
        "{}\n\n<capabilities>\n{}\n</capabilities>\n<execution_rules>Valida parámetros requeridos antes de ejecutar herramientas; pregunta si falta información crítica.</execution_rules>",
        BASE_SYSTEM_PROMPT,
        capabilities_section(tools)
    )
}

/// `- name (relevancia semántica: 0.82): description`, one line per tool
pub fn tools_analysis(tools: &[Value]) -> String {
    if tools.is_empty() {
        return "No hay herramientas relevantes disponibles.".to_string();
    }
    tools
        .iter()
        .map(|tool| {
            let mut line = format!("- {}", str_field(tool, "name", "unknown"));
            if let Some(score) = tool.get("preselection_score").and_then(Value::as_f64) {
                line.push_str(&format!(" (relevancia semántica: {:.2})", score));
            }
            line.push_str(&format!(": {}", str_field(tool, "description", "")));
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `ROLE: content` lines for the last `limit` messages
pub fn format_context(context: &[Value], limit: usize) -> String {
    let start = context.len().saturating_sub(limit);
    context[start..]
        .iter()
        .map(|m| {
            format!(
                "{}: {}",
                str_field(m, "role", "").to_uppercase(),
                str_field(m, "content", "")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt for function-calling intent analysis
pub fn intent_prompt(message: &str, tools: &[Value], context: &[Value]) -> String {
    let ctx = format_context(context, 5);
    let mut prompt = String::new();
    if !ctx.is_empty() {
        prompt.push_str(&ctx);
        prompt.push_str("\n\n");
    }
    prompt.push_str(SELECTION_CONTEXT);
    prompt.push_str("\n\nHERRAMIENTAS DISPONIBLES (ordenadas por relevancia semántica):\n");
    prompt.push_str(&tools_analysis(tools));
    prompt.push_str("\n\nMENSAJE DEL USUARIO A ANALIZAR: ");
    prompt.push_str(message);
    prompt.push_str("\n\n");
    prompt.push_str(USER_INSTRUCTIONS);
    prompt
}

pub fn clarification_prompt(message: &str, missing: &str) -> String {
    format!(
        "El usuario ha enviado: \"{}\"\n\nNecesitas aclaración sobre: {}\n\nGenera una pregunta clara y específica para obtener la información faltante.\nMantén un tono amigable y profesional.",
        message, missing
    )
}

pub fn error_recovery_prompt(error: &str, message: &str) -> String {
    format!(
        "Ha ocurrido un error durante el procesamiento:\nError: {}\nMensaje original: \"{}\"\n\nGenera una respuesta que explique el problema de forma comprensible y ofrezca alternativas si es posible. Mantén un tono profesional.",
        error, message
    )
}

/// Prompt for a free conversational reply over the last three turns
pub fn conversational_prompt(history: &str) -> String {
    format!(
        "Eres un asistente inteligente y conversacional. Responde de manera natural y útil.

Contexto de la conversación:
{}
Reglas críticas:
- No afirmes haber ejecutado acciones ni creado/modificado recursos si no ejecutaste ninguna herramienta.
- Si la solicitud implica una acción, indica que necesitas usar herramientas y evita confirmar resultados.
- Mantén un tono amigable y profesional.

Genera una respuesta conversacional apropiada.",
        history
    )
}

fn str_field<'a>(value: &'a Value, key: &str, default: &'a str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or(default)
}
