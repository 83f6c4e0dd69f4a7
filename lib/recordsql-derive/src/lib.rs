use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, LitStr, parse_macro_input};

/// How a struct field maps to the database.
enum Mapping {
    /// `#[column("name[,modifier]")]`, carrying the raw tag.
    Column(String),
    /// `#[table("name")]` on a nested sub-record.
    Table(String),
}

/// Check if a field has a specific attribute
fn has_attr(field: &syn::Field, attr_name: &str) -> bool {
    field
        .attrs
        .iter()
        .any(|attr| attr.path().is_ident(attr_name))
}

/// Read the tag from `#[column("name,modifier")]` or
/// `#[column(name = "...", modifier = "...")]`.
fn parse_column_tag(attr: &syn::Attribute) -> syn::Result<String> {
    if let Ok(lit) = attr.parse_args::<LitStr>() {
        return Ok(lit.value());
    }

    let mut name = None;
    let mut modifier = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("name") {
            let lit: LitStr = meta.value()?.parse()?;
            name = Some(lit.value());
            Ok(())
        } else if meta.path.is_ident("modifier") {
            let lit: LitStr = meta.value()?.parse()?;
            modifier = Some(lit.value());
            Ok(())
        } else {
            Err(meta.error("expected `name = \"...\"` or `modifier = \"...\"`"))
        }
    })?;

    let name = name.ok_or_else(|| syn::Error::new_spanned(attr, "#[column] needs a name"))?;
    Ok(match modifier {
        Some(modifier) => format!("{},{}", name, modifier),
        None => name,
    })
}

/// Get the mapping of a field, or None for untagged fields.
fn field_mapping(field: &syn::Field) -> syn::Result<Option<Mapping>> {
    if has_attr(field, "column") && has_attr(field, "table") {
        return Err(syn::Error::new_spanned(
            field,
            "a field cannot carry both #[column] and #[table]",
        ));
    }

    let mut mapping = None;
    for attr in &field.attrs {
        let parsed = if attr.path().is_ident("column") {
            Mapping::Column(parse_column_tag(attr)?)
        } else if attr.path().is_ident("table") {
            Mapping::Table(attr.parse_args::<LitStr>()?.value())
        } else {
            continue;
        };
        if mapping.is_some() {
            return Err(syn::Error::new_spanned(attr, "duplicate mapping attribute"));
        }
        mapping = Some(parsed);
    }
    Ok(mapping)
}

/// Derive macro for the Record trait
///
/// Maps the tagged fields of a struct to columns. Positions count tagged
/// fields only, in declaration order; untagged fields are left alone and
/// keep their `Default` value when a row is scanned.
///
/// ## Attributes
///
/// - `#[column("name")]` - map the field to column `name`
/// - `#[column("name,modifier")]` - also route the value through a registered modifier
/// - `#[column(name = "...", modifier = "...")]` - same, spelled out
/// - `#[table("name")]` - the field is a sub-record read from table `name`
///
/// A struct uses either `#[column]` or `#[table]` fields, never both.
///
/// ## Example
///
/// ```text
/// #[derive(Record, Default)]
/// struct Event {
///     #[column("id")]
///     pub id: i64,
///     #[column("payload,json")]
///     pub payload: Json<Payload>,
///     #[column(name = "created_at", modifier = "time_now_utc/skip_updates")]
///     pub created_at: DateTime<Utc>,
/// }
/// ```
#[proc_macro_derive(Record, attributes(column, table))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_record(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_record(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let name_str = name.to_string();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Record only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Record only supports structs",
            ));
        }
    };

    let mut columns = Vec::new();
    let mut tables = Vec::new();
    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        match field_mapping(field)? {
            Some(Mapping::Column(tag)) => columns.push((ident, tag)),
            Some(Mapping::Table(table)) => tables.push((ident, &field.ty, table)),
            None => {}
        }
    }

    if !columns.is_empty() && !tables.is_empty() {
        return Err(syn::Error::new_spanned(
            name,
            "Record cannot mix #[column] and #[table] fields",
        ));
    }

    let (shapes, fields_impl) = if tables.is_empty() {
        let shapes: Vec<_> = columns
            .iter()
            .map(|(ident, tag)| {
                let field_str = ident.to_string();
                quote! { ::recordsql::FieldShape::column(#field_str, #tag) }
            })
            .collect();

        let positions: Vec<usize> = (0..columns.len()).collect();
        let idents: Vec<_> = columns.iter().map(|(ident, _)| *ident).collect();
        // An empty record would leave the value parameter unused.
        let value = if columns.is_empty() {
            format_ident!("_value")
        } else {
            format_ident!("value")
        };

        let fields_impl = quote! {
            impl #impl_generics ::recordsql::Fields for #name #ty_generics #where_clause {
                fn field_value(
                    &self,
                    position: usize,
                ) -> ::std::result::Result<::recordsql::Value, ::recordsql::ValueError> {
                    match position {
                        #(#positions => ::recordsql::ToValue::to_value(&self.#idents),)*
                        _ => ::std::result::Result::Err(::recordsql::ValueError::UnknownPosition(position)),
                    }
                }

                fn set_field(
                    &mut self,
                    position: usize,
                    #value: ::recordsql::Value,
                ) -> ::std::result::Result<(), ::recordsql::ValueError> {
                    match position {
                        #(#positions => {
                            self.#idents = ::recordsql::FromValue::from_value(#value)?;
                            ::std::result::Result::Ok(())
                        })*
                        _ => ::std::result::Result::Err(::recordsql::ValueError::UnknownPosition(position)),
                    }
                }
            }
        };
        (shapes, fields_impl)
    } else {
        let shapes: Vec<_> = tables
            .iter()
            .map(|(ident, ty, table)| {
                let field_str = ident.to_string();
                quote! {
                    ::recordsql::FieldShape::nested(
                        #field_str,
                        #table,
                        <#ty as ::recordsql::Record>::shape,
                    )
                }
            })
            .collect();

        let positions: Vec<usize> = (0..tables.len()).collect();
        let idents: Vec<_> = tables.iter().map(|(ident, _, _)| *ident).collect();

        let fields_impl = quote! {
            impl #impl_generics ::recordsql::Fields for #name #ty_generics #where_clause {
                fn field_value(
                    &self,
                    position: usize,
                ) -> ::std::result::Result<::recordsql::Value, ::recordsql::ValueError> {
                    // Nested records are read through their sub-records
                    ::std::result::Result::Err(::recordsql::ValueError::UnknownPosition(position))
                }

                fn set_field(
                    &mut self,
                    position: usize,
                    _value: ::recordsql::Value,
                ) -> ::std::result::Result<(), ::recordsql::ValueError> {
                    ::std::result::Result::Err(::recordsql::ValueError::UnknownPosition(position))
                }

                fn nested_mut(&mut self, position: usize) -> ::std::option::Option<&mut dyn ::recordsql::Fields> {
                    match position {
                        #(#positions => ::std::option::Option::Some(&mut self.#idents as &mut dyn ::recordsql::Fields),)*
                        _ => ::std::option::Option::None,
                    }
                }
            }
        };
        (shapes, fields_impl)
    };

    Ok(quote! {
        impl #impl_generics ::recordsql::Record for #name #ty_generics #where_clause {
            fn shape() -> ::recordsql::RecordShape {
                ::recordsql::RecordShape {
                    type_id: ::std::any::TypeId::of::<Self>(),
                    type_name: #name_str,
                    fields: ::std::vec![#(#shapes),*],
                }
            }
        }

        #fields_impl
    })
}
