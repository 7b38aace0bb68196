// Text helpers shared by the extractors

/// Replace accented Latin letters with their base letter
///
/// The mapping is one char to one char, so char offsets computed on the
/// folded text line up with the original.
pub fn fold_accents(text: &str) -> String {
    text.chars().map(fold_char).collect()
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'ã' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        'Á' | 'À' | 'Ä' | 'Â' | 'Ã' => 'A',
        'É' | 'È' | 'Ë' | 'Ê' => 'E',
        'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
        'Ó' | 'Ò' | 'Ö' | 'Ô' | 'Õ' => 'O',
        'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
        'Ñ' => 'N',
        'Ç' => 'C',
        other => other,
    }
}

/// Ways a field name may be written in free text
///
/// `idVuelo` and `id_vuelo` both yield "id vuelo" and "idvuelo". Single
/// parts are never emitted since they collide with generic words.
pub fn field_variations(field_name: &str) -> Vec<String> {
    let mut variations = vec![field_name.to_string()];

    let camel = camel_parts(field_name);
    if camel.len() > 1 {
        variations.push(camel.join(" "));
        variations.push(camel.concat().to_lowercase());
    }

    let snake: Vec<&str> = field_name.split('_').collect();
    if snake.len() > 1 {
        variations.push(snake.join(" "));
        variations.push(snake.concat().to_lowercase());
    }

    let mut seen = std::collections::HashSet::new();
    variations.retain(|v| seen.insert(v.clone()));
    variations
}

/// Split on ASCII case boundaries: `[A-Z][a-z]*|[a-z]+`, dropping other chars
pub fn camel_parts(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            current.push(c);
        } else if c.is_ascii_lowercase() {
            current.push(c);
        } else if !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Convert a byte offset into a char offset
pub fn char_offset(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset.min(text.len())].chars().count()
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_accents_keeps_length() {
        let text = "Reservá el asiento número 12 para Muñoz";
        let folded = fold_accents(text);
        assert_eq!(folded, "Reserva el asiento numero 12 para Munoz");
        assert_eq!(char_len(text), char_len(&folded));
    }

    #[test]
    fn test_field_variations_snake() {
        let vars = field_variations("id_vuelo");
        assert_eq!(vars, vec!["id_vuelo", "id vuelo", "idvuelo"]);
    }

    #[test]
    fn test_field_variations_camel() {
        let vars = field_variations("emailDestino");
        assert_eq!(vars, vec!["emailDestino", "email Destino", "emaildestino"]);
    }

    #[test]
    fn test_field_variations_single_word() {
        assert_eq!(field_variations("monto"), vec!["monto"]);
        assert_eq!(field_variations("Numasiento"), vec!["Numasiento"]);
    }

    #[test]
    fn test_camel_parts_drops_digits() {
        assert_eq!(camel_parts("metodoPago2"), vec!["metodo", "Pago"]);
    }

    #[test]
    fn test_char_offset() {
        let text = "año 2024";
        let byte = text.find("2024").unwrap();
        assert_eq!(char_offset(text, byte), 4);
    }
}
